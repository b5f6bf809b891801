//! Composing passes over class models
//!
//! A [`Pass`] edits one class in place and declares up front which parts of the class it reads
//! and writes (see [`Intent`]). Passes are assembled into a [`Pipeline`], which refuses
//! compositions where two passes write to the same thing unless told to run them one after
//! another anyway. Running a pipeline over a class applies every pass in order, then
//! recomputes frames for the methods that were edited and validates the result.
//!
//! The functions in [`engine`] drive whole runs: bytes in, bytes out, optionally over many
//! classes in parallel.

pub mod engine;
mod errors;
mod pass;
pub mod passes;
mod pipeline;

pub use errors::*;
pub use pass::*;
pub use pipeline::*;
