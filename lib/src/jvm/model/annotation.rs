use crate::jvm::code::Constant;
use crate::jvm::{BinaryName, FieldType};

/// Annotation attached to a class, field, or method
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.16
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    /// Type of the annotation (always an object type)
    pub type_descriptor: FieldType<BinaryName>,

    /// Element name and value pairs
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    /// Annotation class, if the type descriptor is an object type
    pub fn class(&self) -> Option<&BinaryName> {
        self.type_descriptor.class()
    }
}

/// Value of an annotation element
#[derive(Clone, Debug, PartialEq)]
pub enum ElementValue {
    /// Primitive or string constant, along with its tag (`B`, `C`, `D`, `F`, `I`, `J`, `S`, `Z`,
    /// or `s`)
    Const { tag: u8, value: Constant },

    Enum {
        type_descriptor: FieldType<BinaryName>,
        const_name: String,
    },

    /// Class literal (`None` is `void.class`)
    Class(Option<FieldType<BinaryName>>),

    Annotation(Annotation),

    Array(Vec<ElementValue>),
}
