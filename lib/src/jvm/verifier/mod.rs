//! Bytecode verification types and frames
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all jump targets
//! in a method is the _stack map table_.
//!
//! Knowing the frame at a point in the code makes it possible to compute the frame after the
//! next instruction (see [`ExecutionFrame::execute`]). The "types" used (represented using
//! [`VerificationType`]) are slightly augmented to take into account initialization and null.
//!
//! Frames come in three shapes:
//!
//!   - [`ModelFrame`] is what methods carry around: classes are names and uninitialized values
//!     point at the label before their `new` instruction
//!   - [`SerializableFrame`] is what goes into the `StackMapTable` attribute
//!   - [`ExecutionFrame`] is the slot-per-entry form used while stepping through code
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod frame;
mod types;

pub use frame::*;
pub use types::*;
