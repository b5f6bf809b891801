//! Finding classes that have to stay in the same package
//!
//! Moving classes between packages (say, to obfuscate or to split a jar) is only safe if every
//! package-private access still happens inside one package. Starting from one package per
//! class, [`organize`] merges the packages of two classes whenever one of them uses something
//! of the other that is only visible inside the package:
//!
//!   - a class that is not public
//!   - a field or method that is package-private
//!   - a protected field or method, used from a class that does not inherit it
//!
//! References are collected from the class header (superclass, interfaces, generic signature,
//! inner class entries, record components), member descriptors and signatures, `Exceptions`,
//! annotations of every kind (including enum constants and class literals in their values), and
//! method bodies (field and method instructions, type instructions, `ldc` constants, bootstrap
//! methods and their arguments, exception handler types, local variable types).
//!
//! Classes outside the analyzed set are ignored: they cannot move anyway.

mod analysis;
mod errors;
mod map;
mod signature;

pub use analysis::*;
pub use errors::*;
pub use map::*;
pub use signature::*;
