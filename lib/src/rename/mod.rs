//! Whole-program identifier renaming
//!
//! The [`RenamingEngine`] decides new names for classes, fields, and methods against a
//! [`crate::hierarchy::ClassHierarchy`], then rewrites every program class through a
//! [`Remapper`]. Methods that override each other (in either direction, through classes or
//! interfaces) always end up sharing a single new name, or all keep their original one.

mod dictionary;
mod engine;
mod exclusion;
mod remapper;
mod report;
mod settings;
mod signature;

pub use dictionary::*;
pub use engine::*;
pub use exclusion::*;
pub use remapper::*;
pub use report::*;
pub use settings::*;
pub use signature::*;
