use super::{Error, Pass, PassOutcome};
use crate::jvm::model::{ClassModel, Code};
use crate::jvm::resolver::SymbolResolver;
use crate::jvm::{emitter, frames};
use crate::settings::Settings;
use log::{debug, info};

/// What to do when two passes declare writes to overlapping targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Refuse to build the pipeline
    Reject,

    /// Accept it: later passes see (and may overwrite) what earlier passes did
    Sequential,
}

/// Ordered passes, checked for conflicting writes
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
    merge_policy: MergePolicy,
}

/// Result of running a pipeline over one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub class: String,

    /// Outcome of each pass, in the order passes ran
    pub outcomes: Vec<(String, PassOutcome)>,

    /// Number of methods whose frames, max stack, and max locals were recomputed
    pub recomputed: usize,
}

impl RunReport {
    /// Did any pass change the class?
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(|(_, outcome)| outcome.changed())
    }
}

impl Pipeline {
    /// Assemble passes, checking their write intents against each other
    pub fn new(passes: Vec<Box<dyn Pass>>, merge_policy: MergePolicy) -> Result<Pipeline, Error> {
        if merge_policy == MergePolicy::Reject {
            for (i, first) in passes.iter().enumerate() {
                let first_writes: Vec<_> = first
                    .intents()
                    .into_iter()
                    .filter(|intent| intent.is_write())
                    .collect();
                for second in &passes[i + 1..] {
                    for intent in second.intents().into_iter().filter(|intent| intent.is_write()) {
                        if first_writes
                            .iter()
                            .any(|first_write| first_write.target.overlaps(&intent.target))
                        {
                            return Err(Error::PassConflict {
                                first: first.name().to_owned(),
                                second: second.name().to_owned(),
                                target: intent.target,
                            });
                        }
                    }
                }
            }
        }

        Ok(Pipeline {
            passes,
            merge_policy,
        })
    }

    /// Pipeline that does nothing but recompute stale metadata
    pub fn empty() -> Pipeline {
        Pipeline {
            passes: vec![],
            merge_policy: MergePolicy::Reject,
        }
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.passes.iter().map(|pass| pass.name())
    }

    /// Apply every pass in order, then recompute and validate
    ///
    /// The class is left in whatever state the failing step left it in if there is an error.
    pub fn run(
        &self,
        class: &mut ClassModel,
        resolver: &SymbolResolver,
        settings: &Settings,
    ) -> Result<RunReport, Error> {
        let mut outcomes = vec![];
        for pass in &self.passes {
            let outcome = pass.apply(class, resolver)?;
            match outcome {
                PassOutcome::Changed => info!("{}: '{}' changed the class", class.name, pass.name()),
                PassOutcome::Unchanged => info!("{}: '{}' left the class unchanged", class.name, pass.name()),
            }
            outcomes.push((pass.name().to_owned(), outcome));
        }

        let recomputed = class
            .methods
            .iter()
            .filter(|method| method.code.as_ref().map_or(false, Code::is_stale))
            .count();
        if recomputed > 0 {
            debug!("{}: recomputing frames for {} method(s)", class.name, recomputed);
        }
        frames::recompute_class(class, resolver, settings)?;
        emitter::validate(class)?;

        Ok(RunReport {
            class: class.name.to_string(),
            outcomes,
            recomputed,
        })
    }
}
