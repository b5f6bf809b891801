//! Load, edit, and emit JVM classes
//!
//! ### Simple example
//!
//! Consider the following simple Java class:
//!
//! ```java,ignore,no_run
//! public class Adder {
//!     public static int add(int x, int y) {
//!         return x + y;
//!     }
//! }
//! ```
//!
//! Generating an analogous class file, then reading it back, can be done as follows:
//!
//! ```
//! use classmorph::jvm::class_file::Version;
//! use classmorph::jvm::code::Instruction::*;
//! use classmorph::jvm::model::{ClassModel, Code, MethodModel};
//! use classmorph::jvm::resolver::{InMemoryClassSource, SymbolResolver};
//! use classmorph::jvm::{emitter, frames, loader};
//! use classmorph::jvm::*;
//! use classmorph::settings::Settings;
//!
//! # fn generate_class() -> Result<(), Error> {
//! // Declare the class
//! let mut class = ClassModel::new(
//!     Version::JAVA8,
//!     ClassAccessFlags::PUBLIC,
//!     BinaryName::from_string(String::from("me/alec/Adder")).unwrap(),
//!     Some(BinaryName::OBJECT),
//! );
//!
//! // Write the method body
//! let mut add = MethodModel::new(
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     UnqualifiedName::from_string(String::from("add")).unwrap(),
//!     MethodDescriptor {
//!         parameters: vec![FieldType::int(), FieldType::int()],
//!         return_type: Some(FieldType::int()),
//!     },
//! );
//! let mut code = Code::new();
//! code.push_instruction(ILoad(0));
//! code.push_instruction(ILoad(1));
//! code.push_instruction(IAdd);
//! code.push_instruction(IReturn);
//! add.code = Some(code);
//! class.methods.push(add);
//!
//! // Compute max stack, max locals, and frames
//! let java_library = InMemoryClassSource::with_java_library();
//! let resolver = SymbolResolver::new(&java_library);
//! frames::recompute_class(&mut class, &resolver, &Settings::new())?;
//!
//! // Encode the class into bytes and load it back
//! let class_bytes: Vec<u8> = emitter::emit(&class)?;
//! let reloaded = loader::load(&class_bytes)?;
//! let code = reloaded.find_method("add", "(II)I").unwrap().code.as_ref().unwrap();
//! assert_eq!(code.max_stack(), 2);
//! assert_eq!(code.max_locals(), 2);
//! # Ok(())
//! # }
//! # generate_class().unwrap();
//! ```

mod access_flags;
pub mod binary_format;
pub mod class_file;
pub mod code;
mod descriptors;
pub mod emitter;
mod errors;
pub mod frames;
pub mod loader;
pub mod model;
mod names;
pub mod patcher;
pub mod resolver;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
