//! Passes shipped with the library

mod accessor;
mod entry_hook;
mod strip_debug;

pub use accessor::*;
pub use entry_hook::*;
pub use strip_debug::*;
