use super::Target;
use crate::jvm;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Jvm(#[from] jvm::Error),

    /// Two passes want to write the same part of a class
    #[error("passes '{first}' and '{second}' both write to {target}")]
    PassConflict {
        first: String,
        second: String,
        target: Target,
    },

    /// Something went wrong while working on a specific class
    #[error("{class}: {source}")]
    InClass { class: String, source: Box<Error> },

    #[error("I/O error on '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("cannot start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Tag an error with the class it happened in
    pub fn in_class(self, class: impl Into<String>) -> Error {
        Error::InClass {
            class: class.into(),
            source: Box::new(self),
        }
    }

    /// Error without any class context around it
    pub fn root(&self) -> &Error {
        match self {
            Error::InClass { source, .. } => source.root(),
            other => other,
        }
    }

    /// The underlying class file error, if there is one
    pub fn as_jvm(&self) -> Option<&jvm::Error> {
        match self.root() {
            Error::Jvm(err) => Some(err),
            _ => None,
        }
    }
}
