use crate::jvm::code::Instruction;
use crate::jvm::model::{ClassModel, Code, MethodModel};
use crate::jvm::resolver::SymbolResolver;
use crate::jvm::{
    self, BaseType, FieldType, MethodAccessFlags, MethodDescriptor, Name, RenderDescriptor,
    UnqualifiedName, Visibility,
};
use crate::transform::{Intent, Pass, PassOutcome, Target};
use log::{debug, warn};

/// Adds a `static synthetic` getter for a private field
///
/// The getter is named `access$<field>`. For an instance field it takes the instance as its only
/// argument. Nothing happens if the field is missing or not private, or if the getter is
/// already there.
pub struct AccessorPass {
    field: UnqualifiedName,
    accessor: UnqualifiedName,
}

impl AccessorPass {
    pub fn new(field: UnqualifiedName) -> Result<AccessorPass, String> {
        if field.is_initializer() {
            return Err(format!("'{}' is not a field name", field));
        }
        let accessor = UnqualifiedName::from_string(format!("access${}", field))?;
        Ok(AccessorPass { field, accessor })
    }

    pub fn accessor_name(&self) -> &UnqualifiedName {
        &self.accessor
    }
}

fn return_instruction(field_type: &FieldType<jvm::BinaryName>) -> Instruction {
    match field_type {
        FieldType::Base(BaseType::Long) => Instruction::LReturn,
        FieldType::Base(BaseType::Float) => Instruction::FReturn,
        FieldType::Base(BaseType::Double) => Instruction::DReturn,
        FieldType::Base(_) => Instruction::IReturn,
        FieldType::Ref(_) => Instruction::AReturn,
    }
}

impl Pass for AccessorPass {
    fn name(&self) -> &str {
        "accessor"
    }

    fn intents(&self) -> Vec<Intent> {
        vec![
            Intent::write(Target::Class),
            Intent::read(Target::field(self.field.as_str())),
        ]
    }

    fn apply(
        &self,
        class: &mut ClassModel,
        _resolver: &SymbolResolver,
    ) -> Result<PassOutcome, jvm::Error> {
        let field = match class.find_field(self.field.as_str()) {
            Some(field) => field.clone(),
            None => {
                debug!("{}: no field {}", class.name, self.field);
                return Ok(PassOutcome::Unchanged);
            }
        };
        if field.access_flags.visibility() != Visibility::Private {
            debug!("{}: field {} is not private", class.name, self.field);
            return Ok(PassOutcome::Unchanged);
        }
        if class.is_interface() {
            warn!("{}: not adding an accessor to an interface", class.name);
            return Ok(PassOutcome::Unchanged);
        }

        let parameters = if field.is_static() {
            vec![]
        } else {
            vec![FieldType::object(class.name.clone())]
        };
        let descriptor = MethodDescriptor {
            parameters,
            return_type: Some(field.descriptor.clone()),
        };
        if class
            .find_method(self.accessor.as_str(), &descriptor.render())
            .is_some()
        {
            debug!("{}: {} already exists", class.name, self.accessor);
            return Ok(PassOutcome::Unchanged);
        }

        let field_ref = class.constants.get_field_ref(
            class.name.as_str(),
            field.name.as_str(),
            &field.descriptor.render(),
        )?;
        let mut code = Code::new();
        if field.is_static() {
            code.push_instruction(Instruction::GetStatic(field_ref));
        } else {
            code.push_instruction(Instruction::ALoad(0));
            code.push_instruction(Instruction::GetField(field_ref));
        }
        code.push_instruction(return_instruction(&field.descriptor));

        let mut accessor = MethodModel::new(
            MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
            self.accessor.clone(),
            descriptor,
        );
        accessor.code = Some(code);
        debug!("{}: adding {}", class.name, accessor.member_name());
        class.methods.push(accessor);
        Ok(PassOutcome::Changed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::model::FieldModel;
    use crate::jvm::resolver::InMemoryClassSource;
    use crate::jvm::{BinaryName, ClassAccessFlags, FieldAccessFlags};

    fn class() -> ClassModel {
        let mut class = ClassModel::new(
            Version::JAVA8,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("me/Counter").unwrap(),
            Some(BinaryName::OBJECT),
        );
        class.fields.push(FieldModel::new(
            FieldAccessFlags::PRIVATE,
            UnqualifiedName::from_str("count").unwrap(),
            FieldType::long(),
        ));
        class.fields.push(FieldModel::new(
            FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC,
            UnqualifiedName::from_str("instances").unwrap(),
            FieldType::int(),
        ));
        class.fields.push(FieldModel::new(
            FieldAccessFlags::PUBLIC,
            UnqualifiedName::from_str("label").unwrap(),
            FieldType::object(BinaryName::STRING),
        ));
        class
    }

    fn apply(class: &mut ClassModel, field: &str) -> PassOutcome {
        let source = InMemoryClassSource::new();
        let resolver = SymbolResolver::new(&source);
        AccessorPass::new(UnqualifiedName::from_str(field).unwrap())
            .unwrap()
            .apply(class, &resolver)
            .unwrap()
    }

    #[test]
    fn instance_field_accessor() {
        let mut class = class();
        assert_eq!(apply(&mut class, "count"), PassOutcome::Changed);

        let accessor = class
            .find_method("access$count", "(Lme/Counter;)J")
            .unwrap();
        assert!(accessor.is_static());
        assert!(accessor.access_flags.contains(MethodAccessFlags::SYNTHETIC));
        let code = accessor.code.as_ref().unwrap();
        let instructions: Vec<_> = code.instructions().collect();
        assert_eq!(instructions[0], &Instruction::ALoad(0));
        assert!(matches!(instructions[1], Instruction::GetField(_)));
        assert_eq!(instructions[2], &Instruction::LReturn);

        assert_eq!(apply(&mut class, "count"), PassOutcome::Unchanged);
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn static_field_accessor() {
        let mut class = class();
        assert_eq!(apply(&mut class, "instances"), PassOutcome::Changed);
        let accessor = class.find_method("access$instances", "()I").unwrap();
        let instructions: Vec<_> = accessor.code.as_ref().unwrap().instructions().collect();
        assert!(matches!(instructions[0], Instruction::GetStatic(_)));
        assert_eq!(instructions[1], &Instruction::IReturn);
    }

    #[test]
    fn only_private_fields() {
        let mut class = class();
        assert_eq!(apply(&mut class, "label"), PassOutcome::Unchanged);
        assert_eq!(apply(&mut class, "missing"), PassOutcome::Unchanged);
        assert!(class.methods.is_empty());
    }
}
