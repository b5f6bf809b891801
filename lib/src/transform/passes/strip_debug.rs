use crate::jvm;
use crate::jvm::model::ClassModel;
use crate::jvm::patcher::Patcher;
use crate::jvm::resolver::SymbolResolver;
use crate::transform::{Intent, Pass, PassOutcome, Target};
use log::debug;

/// Drops line numbers and local variable tables from every method
pub struct StripDebugPass;

impl Pass for StripDebugPass {
    fn name(&self) -> &str {
        "strip-debug"
    }

    fn intents(&self) -> Vec<Intent> {
        vec![Intent::write(Target::AllMethods)]
    }

    fn apply(
        &self,
        class: &mut ClassModel,
        _resolver: &SymbolResolver,
    ) -> Result<PassOutcome, jvm::Error> {
        let mut stripped = 0;
        for method in class.methods.iter_mut().filter(|method| method.code.is_some()) {
            if Patcher::new(method)?.clear_debug_info() {
                stripped += 1;
            }
        }
        if stripped > 0 {
            debug!("{}: stripped debug info from {} method(s)", class.name, stripped);
        }
        Ok(PassOutcome::from(stripped > 0))
    }
}
