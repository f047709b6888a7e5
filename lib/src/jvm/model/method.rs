use crate::jvm::code::Code;
use crate::jvm::model::{Annotation, ElementValue, MemberKey};
use crate::jvm::{
    BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, RenderDescriptor, UnqualifiedName,
};

/// Method declared by a class
#[derive(Clone, Debug)]
pub struct MethodEntity {
    pub access_flags: MethodAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,

    /// Generic method signature
    ///
    /// [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.7.9.1)
    pub signature: Option<String>,

    /// Which exceptions can this method throw?
    pub exceptions: Vec<BinaryName>,

    /// Method body (absent for abstract and native methods)
    pub code: Option<Code>,

    /// Default value of an annotation interface element
    pub annotation_default: Option<ElementValue>,

    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
}

impl MethodEntity {
    pub fn new(
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> MethodEntity {
        MethodEntity {
            access_flags,
            name,
            descriptor,
            signature: None,
            exceptions: vec![],
            code: None,
            annotation_default: None,
            visible_annotations: vec![],
            invisible_annotations: vec![],
        }
    }

    /// Identity of the method within its class
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.descriptor.render())
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNTHETIC)
    }

    /// Is this `public static void main(String[])`?
    pub fn is_main(&self) -> bool {
        self.name == UnqualifiedName::MAIN
            && self.descriptor.return_type.is_none()
            && self.descriptor.parameters == [FieldType::array(FieldType::object(BinaryName::STRING))]
    }
}
