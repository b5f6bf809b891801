//! Load JVM class files, rewrite them with ordered passes, and emit verifiable class files again
//!
//! The pieces, leaf first:
//!
//!   - [`jvm::class_file`] reads and writes the raw binary format
//!   - [`jvm::loader`] decodes bytes into a [`jvm::model::ClassModel`] where branch targets are
//!     labels, not offsets
//!   - [`jvm::resolver`] answers subtyping questions for frame computation
//!   - [`jvm::patcher`] edits instruction sequences without breaking label references
//!   - [`jvm::frames`] recomputes stack map frames, max stack, and max locals (using the types
//!     in [`jvm::verifier`])
//!   - [`jvm::emitter`] validates a model and turns it back into bytes
//!   - [`transform`] composes passes into a pipeline and drives whole runs
//!   - [`organize`] groups classes that have to stay in the same package
//!
//! Engine-wide options live in [`settings::Settings`].

pub mod jvm;
pub mod organize;
pub mod settings;
pub mod transform;
pub mod util;
