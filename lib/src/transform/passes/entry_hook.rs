use crate::jvm::class_file::{Constant, ConstantIndex, ConstantPool};
use crate::jvm::code::{CodeElement, Instruction, InvokeType};
use crate::jvm::model::{ClassModel, Code, MethodModel};
use crate::jvm::patcher::Patcher;
use crate::jvm::resolver::SymbolResolver;
use crate::jvm::{self, BinaryName, Name, RenderDescriptor, UnqualifiedName};
use crate::transform::{Intent, Pass, PassOutcome, Target};
use log::debug;

const HOOK_DESCRIPTOR: &str = "(Ljava/lang/String;)V";

/// Calls a static hook at the start of methods, passing it the name of the method
///
/// The inserted code is `ldc "<class>.<method><descriptor>"` followed by
/// `invokestatic <owner>.<hook>(Ljava/lang/String;)V`. Methods that already start with exactly
/// that call are left alone, so running the pass twice changes nothing the second time.
pub struct EntryHookPass {
    owner: BinaryName,
    hook: UnqualifiedName,

    /// Methods to instrument (all of them, if empty)
    methods: Vec<Target>,
}

impl EntryHookPass {
    pub fn new(owner: BinaryName, hook: UnqualifiedName) -> EntryHookPass {
        EntryHookPass {
            owner,
            hook,
            methods: vec![],
        }
    }

    /// Only instrument methods with this name
    pub fn select(mut self, name: impl Into<String>) -> EntryHookPass {
        self.methods.push(Target::method(name));
        self
    }

    /// Only instrument the method with this name and descriptor
    pub fn select_exact(
        mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> EntryHookPass {
        self.methods
            .push(Target::method_with_descriptor(name, descriptor));
        self
    }

    fn is_selected(&self, method: &MethodModel) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|target| target.matches_method(method))
    }

    fn is_hook(&self, class: &BinaryName, method: &MethodModel) -> bool {
        *class == self.owner && method.matches(self.hook.as_str(), HOOK_DESCRIPTOR)
    }

    /// Does the code already begin with the hook call for this message?
    fn starts_with_hook(&self, constants: &ConstantPool, code: &Code, message: &str) -> bool {
        let mut instructions = code.instructions();
        let loads_message = match instructions.next() {
            Some(Instruction::Ldc(index)) => match constants.get(*index) {
                Some(Constant::String(utf8)) => constants
                    .utf8(*utf8)
                    .map_or(false, |string| string == message),
                _ => false,
            },
            _ => false,
        };
        let calls_hook = match instructions.next() {
            Some(Instruction::Invoke(InvokeType::Static, method_ref)) => constants
                .method_ref(*method_ref)
                .map_or(false, |member| {
                    member.class == self.owner.as_str()
                        && member.name == self.hook.as_str()
                        && member.descriptor == HOOK_DESCRIPTOR
                }),
            _ => false,
        };
        loads_message && calls_hook
    }
}

impl Pass for EntryHookPass {
    fn name(&self) -> &str {
        "entry-hook"
    }

    fn intents(&self) -> Vec<Intent> {
        if self.methods.is_empty() {
            vec![Intent::write(Target::AllMethods)]
        } else {
            self.methods.iter().cloned().map(Intent::write).collect()
        }
    }

    fn apply(
        &self,
        class: &mut ClassModel,
        _resolver: &SymbolResolver,
    ) -> Result<PassOutcome, jvm::Error> {
        let ClassModel {
            name,
            constants,
            methods,
            ..
        } = class;

        let mut changed = false;
        for method in methods.iter_mut() {
            if !self.is_selected(method) || self.is_hook(name, method) {
                continue;
            }
            let message = format!("{}.{}{}", name, method.name, method.descriptor.render());
            let code = match &method.code {
                Some(code) => code,
                None => continue,
            };
            if self.starts_with_hook(constants, code, &message) {
                debug!("{}: already hooked", message);
                continue;
            }

            let message_index = ConstantIndex::from(constants.get_string(message.as_str())?);
            let hook_index = constants.get_method_ref(
                self.owner.as_str(),
                self.hook.as_str(),
                HOOK_DESCRIPTOR,
                false,
            )?;
            let fragment: Vec<CodeElement> = vec![
                Instruction::Ldc(message_index).into(),
                Instruction::Invoke(InvokeType::Static, hook_index).into(),
            ];
            Patcher::new(method)?.insert_at_start(fragment)?;
            debug!("{}: inserted entry hook", message);
            changed = true;
        }
        Ok(PassOutcome::from(changed))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::resolver::InMemoryClassSource;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, MethodDescriptor, ParseDescriptor};

    fn class() -> ClassModel {
        let mut class = ClassModel::new(
            Version::JAVA8,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("me/Calc").unwrap(),
            Some(BinaryName::OBJECT),
        );
        for name in ["add", "sub"] {
            let mut method = MethodModel::new(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                UnqualifiedName::from_str(name).unwrap(),
                MethodDescriptor::parse("(II)I").unwrap(),
            );
            let mut code = Code::new();
            code.push_instruction(Instruction::ILoad(0));
            code.push_instruction(Instruction::ILoad(1));
            code.push_instruction(Instruction::IAdd);
            code.push_instruction(Instruction::IReturn);
            method.code = Some(code);
            class.methods.push(method);
        }
        class
    }

    fn pass() -> EntryHookPass {
        EntryHookPass::new(
            BinaryName::from_str("me/Log").unwrap(),
            UnqualifiedName::from_str("enter").unwrap(),
        )
    }

    #[test]
    fn selected_methods_only() {
        let source = InMemoryClassSource::new();
        let resolver = SymbolResolver::new(&source);
        let mut class = class();
        let pass = pass().select_exact("add", "(II)I");
        assert_eq!(
            pass.intents(),
            vec![Intent::write(Target::method_with_descriptor("add", "(II)I"))]
        );
        assert_eq!(pass.apply(&mut class, &resolver).unwrap(), PassOutcome::Changed);

        let add = class.find_method("add", "(II)I").unwrap().code.as_ref().unwrap();
        assert!(add.is_stale());
        assert_eq!(add.instructions().count(), 6);
        assert!(pass.starts_with_hook(&class.constants, add, "me/Calc.add(II)I"));

        let sub = class.find_method("sub", "(II)I").unwrap().code.as_ref().unwrap();
        assert_eq!(sub.instructions().count(), 4);
    }

    #[test]
    fn hooking_twice_is_a_no_op() {
        let source = InMemoryClassSource::new();
        let resolver = SymbolResolver::new(&source);
        let mut class = class();
        let pass = pass();
        assert_eq!(pass.intents(), vec![Intent::write(Target::AllMethods)]);
        assert_eq!(pass.apply(&mut class, &resolver).unwrap(), PassOutcome::Changed);
        let constants = class.constants.len();
        assert_eq!(pass.apply(&mut class, &resolver).unwrap(), PassOutcome::Unchanged);
        assert_eq!(class.constants.len(), constants);

        for method in &class.methods {
            assert_eq!(method.code.as_ref().unwrap().instructions().count(), 6);
        }
    }
}
