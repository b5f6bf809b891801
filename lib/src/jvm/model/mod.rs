//! Editable representation of classes
//!
//! This is the representation passes work with. Compared to the raw [`crate::jvm::class_file`]
//! structures, names and descriptors are parsed and method bodies are sequences of labels and
//! instructions (see [`crate::jvm::code`]) instead of byte arrays.
//!
//!   - __Class__ is represented using [`ClassModel`]
//!   - __Method__ is represented using [`MethodModel`], its body using [`Code`]
//!   - __Field__ is represented using [`FieldModel`]
//!
//! Attributes the model doesn't interpret stay raw, with their constant pool indices still
//! pointing into the class' own pool. Since the pool is append-only, those indices stay valid no
//! matter what passes add.

mod class;
mod code;
mod field;
mod method;

pub use class::*;
pub use code::*;
pub use field::*;
pub use method::*;
