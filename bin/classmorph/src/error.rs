use classmorph::{organize, transform};
use std::fmt;

/// Ways a command can fail as a whole
#[derive(Debug)]
pub enum CliError {
    /// An argument parsed, but doesn't make sense
    BadArgument(String),
    Transform(transform::Error),
    Organize(organize::Error),

    /// Some (but maybe not all) class files could not be transformed
    FailedClasses(usize),
}

impl From<transform::Error> for CliError {
    fn from(err: transform::Error) -> CliError {
        CliError::Transform(err)
    }
}

impl From<organize::Error> for CliError {
    fn from(err: organize::Error) -> CliError {
        CliError::Organize(err)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::BadArgument(msg) => write!(f, "bad argument: {}", msg),
            CliError::Transform(err) => err.fmt(f),
            CliError::Organize(err) => err.fmt(f),
            CliError::FailedClasses(count) => write!(f, "{} class file(s) failed", count),
        }
    }
}
