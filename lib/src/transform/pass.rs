use crate::jvm::model::{ClassModel, FieldModel, MethodModel};
use crate::jvm::resolver::SymbolResolver;
use crate::jvm::{self, RenderDescriptor};
use std::fmt;

/// Edit applied to one class at a time
///
/// Passes must be shareable across threads: the same pass object is applied to many classes at
/// once when a whole directory is transformed.
pub trait Pass: Send + Sync {
    /// Name used in logs and conflict reports
    fn name(&self) -> &str;

    /// Parts of the class this pass reads or writes
    ///
    /// This is checked when the pass is added to a [`super::Pipeline`], before any class is
    /// seen, so it has to cover everything the pass might touch.
    fn intents(&self) -> Vec<Intent>;

    /// Edit the class in place
    ///
    /// Code edits should go through [`jvm::patcher::Patcher`], which keeps labels consistent
    /// and marks metadata for recomputation.
    fn apply(
        &self,
        class: &mut ClassModel,
        resolver: &SymbolResolver,
    ) -> Result<PassOutcome, jvm::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassOutcome {
    Changed,
    Unchanged,
}

impl PassOutcome {
    pub fn changed(self) -> bool {
        self == PassOutcome::Changed
    }
}

impl From<bool> for PassOutcome {
    fn from(changed: bool) -> PassOutcome {
        if changed {
            PassOutcome::Changed
        } else {
            PassOutcome::Unchanged
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Part of a class a pass may touch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Access flags, names, superclass and interfaces, attributes, and the member lists
    /// themselves (adding or removing members)
    Class,

    /// Methods with this name (and descriptor, if there is one)
    Method {
        name: String,
        descriptor: Option<String>,
    },

    AllMethods,

    Field {
        name: String,
    },

    AllFields,
}

impl Target {
    pub fn method(name: impl Into<String>) -> Target {
        Target::Method {
            name: name.into(),
            descriptor: None,
        }
    }

    pub fn method_with_descriptor(name: impl Into<String>, descriptor: impl Into<String>) -> Target {
        Target::Method {
            name: name.into(),
            descriptor: Some(descriptor.into()),
        }
    }

    pub fn field(name: impl Into<String>) -> Target {
        Target::Field { name: name.into() }
    }

    /// Could some part of a class be designated by both targets?
    pub fn overlaps(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Class, Target::Class) => true,
            (Target::AllMethods, Target::AllMethods | Target::Method { .. }) => true,
            (Target::Method { .. }, Target::AllMethods) => true,
            (
                Target::Method {
                    name: name1,
                    descriptor: descriptor1,
                },
                Target::Method {
                    name: name2,
                    descriptor: descriptor2,
                },
            ) => {
                name1 == name2
                    && match (descriptor1, descriptor2) {
                        (Some(descriptor1), Some(descriptor2)) => descriptor1 == descriptor2,
                        _ => true,
                    }
            }
            (Target::AllFields, Target::AllFields | Target::Field { .. }) => true,
            (Target::Field { .. }, Target::AllFields) => true,
            (Target::Field { name: name1 }, Target::Field { name: name2 }) => name1 == name2,
            _ => false,
        }
    }

    pub fn matches_method(&self, method: &MethodModel) -> bool {
        match self {
            Target::AllMethods => true,
            Target::Method { name, descriptor } => {
                method.name.as_ref() == name
                    && descriptor
                        .as_ref()
                        .map_or(true, |descriptor| method.descriptor.render() == *descriptor)
            }
            _ => false,
        }
    }

    pub fn matches_field(&self, field: &FieldModel) -> bool {
        match self {
            Target::AllFields => true,
            Target::Field { name } => field.name.as_ref() == name,
            _ => false,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Class => f.write_str("the class header"),
            Target::Method {
                name,
                descriptor: None,
            } => write!(f, "method {}", name),
            Target::Method {
                name,
                descriptor: Some(descriptor),
            } => write!(f, "method {}{}", name, descriptor),
            Target::AllMethods => f.write_str("all methods"),
            Target::Field { name } => write!(f, "field {}", name),
            Target::AllFields => f.write_str("all fields"),
        }
    }
}

/// Declared access to some part of a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Intent {
    pub access: Access,
    pub target: Target,
}

impl Intent {
    pub fn read(target: Target) -> Intent {
        Intent {
            access: Access::Read,
            target,
        }
    }

    pub fn write(target: Target) -> Intent {
        Intent {
            access: Access::Write,
            target,
        }
    }

    pub fn is_write(&self) -> bool {
        self.access == Access::Write
    }
}
