//! Whole-program JVM bytecode obfuscation
//!
//! The input archive is loaded into a [`repository::ClassRepository`], a configured sequence of
//! [`transform::Transformer`]s rewrites the classes in place, every method is checked by the
//! structural [`jvm::verifier`], and the result is written back out as an archive. See
//! [`obfuscator::Obfuscator`] for the pipeline itself.

mod errors;

pub mod archive;
pub mod config;
pub mod hierarchy;
pub mod jvm;
pub mod obfuscator;
pub mod pattern;
pub mod rename;
pub mod repository;
pub mod transform;

pub use errors::{Error, Result};
