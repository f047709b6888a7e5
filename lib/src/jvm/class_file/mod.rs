//! Binary class file format
//!
//! [`read_class`] turns class file bytes into a [`ClassEntity`](crate::jvm::model::ClassEntity)
//! and [`write_class`] goes the other way. The constant pool is rebuilt from scratch on every
//! write, so constants that nothing refers to anymore (eg. names replaced by the renamer) do not
//! survive a round trip.

mod attribute;
mod constants;
mod reader;
mod serialize;
mod writer;

pub use attribute::*;
pub use constants::*;
pub use reader::*;
pub use serialize::*;
pub use writer::*;
