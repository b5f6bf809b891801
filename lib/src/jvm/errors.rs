use super::class_file::ConstantPoolOverflow;
use super::code::Label;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input bytes are not a class file we can read
    #[error("malformed class file: {0}")]
    MalformedClass(#[from] MalformedKind),

    #[error(transparent)]
    ConstantPoolOverflow(#[from] ConstantPoolOverflow),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// An edit would leave a label referenced but no longer present
    #[error("{method}: label {label:?} is still referenced by {referrer}")]
    DanglingReference {
        method: String,
        label: Label,
        referrer: Referrer,
    },

    /// An edit was handed labels it cannot use
    #[error("{method}: {kind}")]
    InvalidEdit { method: String, kind: EditErrorKind },

    /// Frames could not be computed for the method
    #[error("{method}: unverifiable control flow at instruction {index}: {kind}")]
    UnverifiableControlFlow {
        method: String,
        index: usize,
        kind: VerifierErrorKind,
    },

    /// Model failed a check just before being written out
    #[error("cannot emit {class}.{member}: {kind}")]
    EmissionValidation {
        class: String,
        member: String,
        kind: ValidationKind,
    },
}

/// Reasons why class bytes fail to load
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    #[error("unexpected end of input")]
    Truncated,

    #[error("invalid magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { index: u16, tag: u8 },

    #[error("constant pool index {index} is not a valid {expected} entry")]
    BadConstantReference { index: u16, expected: &'static str },

    #[error("modified UTF-8 error: {0}")]
    BadModifiedUtf8(String),

    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("instruction at offset {offset} targets {target}, which is not an instruction boundary")]
    BadCodeOffset { offset: usize, target: i64 },

    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    #[error("bad attribute {name}: {reason}")]
    BadAttribute { name: String, reason: String },

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Whatever still points at a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Referrer {
    /// Instruction at this position (among instructions only) in the code
    Instruction { index: usize, rendered: String },

    /// Boundary or handler of the exception range at this position in the exception table
    ExceptionRange { index: usize },

    /// Stack map frame (its position or an uninitialized type in it)
    Frame { index: usize },

    LineNumber { index: usize },

    LocalVariable { index: usize },

    LocalVariableType { index: usize },
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Referrer::Instruction { index, rendered } => {
                write!(f, "instruction #{} ({})", index, rendered)
            }
            Referrer::ExceptionRange { index } => write!(f, "exception range #{}", index),
            Referrer::Frame { index } => write!(f, "frame #{}", index),
            Referrer::LineNumber { index } => write!(f, "line number entry #{}", index),
            Referrer::LocalVariable { index } => write!(f, "local variable entry #{}", index),
            Referrer::LocalVariableType { index } => {
                write!(f, "local variable type entry #{}", index)
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditErrorKind {
    #[error("method has no code")]
    NoCode,

    #[error("label {0:?} is not placed in the code")]
    UnknownLabel(Label),

    #[error("label {0:?} is placed twice")]
    DuplicateLabel(Label),

    #[error("range end {end:?} comes before range start {start:?}")]
    InvertedRange { start: Label, end: Label },

    #[error("instruction #{0} does not exist")]
    NoSuchInstruction(usize),

    #[error("exception range #{0} does not exist")]
    NoSuchExceptionRange(usize),

    #[error("instruction #{index} does not branch to {label:?}")]
    NotATarget { index: usize, label: Label },
}

/// What went wrong during frame computation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    #[error("operand stack underflow")]
    EmptyStack,

    #[error("value of width {0} where another width was expected")]
    InvalidWidth(usize),

    #[error("invalid local variable index {0}")]
    InvalidIndex(u16),

    #[error("unexpected type {found}, expected {expected}")]
    InvalidType { found: String, expected: String },

    #[error("constant {0} cannot be used by this instruction")]
    BadConstant(u16),

    #[error("stack heights {0} and {1} meet at a merge point")]
    IncompatibleStackHeights(usize, usize),

    #[error("incompatible types {0} and {1} meet at a merge point")]
    IncompatibleTypes(String, String),

    #[error("jsr/ret subroutines are not allowed in classes that need stack map frames")]
    SubroutineWithFrames,

    #[error("execution falls off the end of the code")]
    FallsOffEnd,

    #[error("`new` instruction is not preceded by a label")]
    UnlabeledNew,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    #[error("non-abstract, non-native method has no code")]
    MissingCode,

    #[error("abstract or native method carries code")]
    UnexpectedCode,

    #[error("method code has no instructions")]
    EmptyCode,

    #[error("frames, max stack, and max locals are stale")]
    StaleMetadata,

    #[error("label {0:?} is referenced but not placed")]
    DanglingLabel(Label),

    #[error("label {0:?} is placed twice")]
    DuplicateLabel(Label),

    #[error("exception range #{0} covers no instructions")]
    EmptyExceptionRange(usize),

    #[error("local variable {index} used by instruction #{instruction} exceeds max locals {max_locals}")]
    LocalsOverflow {
        instruction: usize,
        index: u16,
        max_locals: u16,
    },

    #[error("instruction #{instruction} expects a {expected} constant at index {index}")]
    ConstantKind {
        instruction: usize,
        index: u16,
        expected: &'static str,
    },

    #[error("branch at instruction #{0} is too far from its target")]
    BranchOutOfRange(usize),

    #[error("code is larger than 65535 bytes")]
    CodeTooLarge,

    #[error("two different frames at offset {0}")]
    ConflictingFrames(usize),
}

impl Error {
    /// Did the error come from unreadable input (as opposed to a bad edit)?
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedClass(_))
    }
}
