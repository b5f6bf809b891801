//! Raw class file structures
//!
//! Everything here mirrors the on-disk layout closely: members and attributes refer to the
//! constant pool by index and code is just bytes. See [`crate::jvm::model`] for the editable
//! representation built on top of this.

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use version::*;
