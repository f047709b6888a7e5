use crate::jvm::code::Constant;
use crate::jvm::model::{Annotation, MemberKey};
use crate::jvm::{BinaryName, FieldAccessFlags, FieldType, RenderDescriptor, UnqualifiedName};

/// Field declared by a class
#[derive(Clone, Debug)]
pub struct FieldEntity {
    pub access_flags: FieldAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,

    /// Generic field signature
    pub signature: Option<String>,

    /// Initial value of a static final field
    pub constant_value: Option<Constant>,

    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
}

impl FieldEntity {
    pub fn new(
        access_flags: FieldAccessFlags,
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    ) -> FieldEntity {
        FieldEntity {
            access_flags,
            name,
            descriptor,
            signature: None,
            constant_value: None,
            visible_annotations: vec![],
            invisible_annotations: vec![],
        }
    }

    /// Identity of the field within its class
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.descriptor.render())
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::SYNTHETIC)
    }
}
