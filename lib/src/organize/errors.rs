use super::PackageId;
use crate::jvm::{self, MalformedKind};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Jvm(#[from] jvm::Error),

    #[error("I/O error on '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("class {0} is not in the map")]
    UnknownClass(String),

    #[error("package {0} is not in the map")]
    UnknownPackage(PackageId),
}

impl From<MalformedKind> for Error {
    fn from(kind: MalformedKind) -> Error {
        Error::Jvm(jvm::Error::MalformedClass(kind))
    }
}
