//! Semantic representations of classes
//!
//! This is the representation every pass works on: the class file reader produces it, the
//! transformers and the renaming engine mutate it in place, and the writer turns it back into
//! bytes.
//!
//!   - __Class__ is represented using [`ClassEntity`]
//!   - __Method__ is represented using [`MethodEntity`]
//!   - __Field__ is represented using [`FieldEntity`]
//!
//! Members are identified within their class by [`MemberKey`], the `(name, descriptor)` pair.

mod annotation;
mod builder;
mod class;
mod field;
mod method;

pub use annotation::*;
pub use builder::*;
pub use class::*;
pub use field::*;
pub use method::*;

use crate::jvm::UnqualifiedName;
use std::fmt;

/// Identity of a field or method within its declaring class
///
/// Overloads share a name, so the descriptor is part of the identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub name: UnqualifiedName,
    pub descriptor: String,
}

impl MemberKey {
    pub fn new(name: UnqualifiedName, descriptor: impl Into<String>) -> MemberKey {
        MemberKey {
            name,
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Debug for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.descriptor)
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}
