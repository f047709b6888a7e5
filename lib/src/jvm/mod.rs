//! Manipulate JVM classes
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
//! Building an analogous class in memory, checking it, and encoding it can be done as follows:
//!
//! ```
//! use jarcloak::jvm::class_file::write_class;
//! use jarcloak::jvm::code::opcode::IADD;
//! use jarcloak::jvm::model::{ClassEntity, ClassOrigin, MethodBuilder};
//! use jarcloak::jvm::verifier::{verify_method, OpaqueHierarchy};
//! use jarcloak::jvm::*;
//!
//! # fn generate_class() -> Result<Vec<u8>, jarcloak::Error> {
//! let mut class = ClassEntity::new(
//!     BinaryName::from_string(String::from("me/demo/Adder")).unwrap(),
//!     Some(BinaryName::OBJECT),
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     ClassOrigin::Synthetic,
//! );
//!
//! // Generate the method body
//! let builder = MethodBuilder::new(
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     UnqualifiedName::from_string(String::from("add")).unwrap(),
//!     MethodDescriptor {
//!         parameters: vec![FieldType::int(), FieldType::int()],
//!         return_type: Some(FieldType::int()),
//!     },
//! );
//! let mut code = builder.code();
//! code.get_local(0, &FieldType::int())
//!     .get_local(1, &FieldType::int())
//!     .simple(IADD)
//!     .return_(Some(&FieldType::int()));
//! let insns = code.build();
//! let mut method = builder.finish(insns);
//!
//! // Compute `max_stack`, `max_locals`, and frames, then add the method to the class
//! verify_method(&class, &mut method, &OpaqueHierarchy)?;
//! class.add_method(method)?;
//!
//! // Finally, encode the class into bytes
//! write_class(&class)
//! # }
//! # generate_class().unwrap();
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
pub mod model;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use names::*;
