//! Bytecode representation
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. Inside the model, a method body is a flat sequence of
//! [`CodeElement`]s: instructions interleaved with [`Label`] markers. Every jump target is a
//! label rather than an offset, so instructions can be inserted and removed without
//! renumbering anything.
//!
//! Only [`decode`] (while loading) and [`encode`] (while emitting) deal with byte offsets. The
//! encoder picks the shortest encoding for each instruction (`iload_0` vs `iload` vs
//! `wide iload`, `ldc` vs `ldc_w`) and widens `goto`/`jsr` to `goto_w`/`jsr_w` when a target is
//! out of reach of a 16-bit offset.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-6.html#jvms-6.5

mod decode;
mod encode;
mod instruction;
mod label;

pub use decode::*;
pub use encode::*;
pub use instruction::*;
pub use label::*;
