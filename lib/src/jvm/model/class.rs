use crate::errors::{Error, Result};
use crate::jvm::class_file::Version;
use crate::jvm::code::opcode::RETURN;
use crate::jvm::code::{Code, Insn, SynLabelGenerator};
use crate::jvm::model::{Annotation, FieldEntity, MemberKey, MethodEntity};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldType, InnerClassAccessFlags, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};
use std::fmt;

/// Which logical source produced a class
#[derive(Clone, PartialEq, Eq)]
pub enum ClassOrigin {
    /// Read from the input archive, under the given entry name
    Target { entry: String },

    /// Generated by a transformation
    Synthetic,

    /// Read-only dependency (library jar or platform module)
    External { source: String },
}

impl ClassOrigin {
    pub fn is_external(&self) -> bool {
        matches!(self, ClassOrigin::External { .. })
    }
}

impl fmt::Debug for ClassOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassOrigin::Target { entry } => write!(f, "target({})", entry),
            ClassOrigin::Synthetic => f.write_str("synthetic"),
            ClassOrigin::External { source } => write!(f, "external({})", source),
        }
    }
}

/// Entry of the `InnerClasses` attribute
#[derive(Clone, Debug, PartialEq)]
pub struct InnerClassEntry {
    pub inner_class: BinaryName,

    /// `None` for local and anonymous classes
    pub outer_class: Option<BinaryName>,

    /// `None` for anonymous classes
    pub inner_name: Option<UnqualifiedName>,

    pub access_flags: InnerClassAccessFlags,
}

/// Content of the `EnclosingMethod` attribute
#[derive(Clone, Debug, PartialEq)]
pub struct EnclosingMethod {
    pub class: BinaryName,

    /// `None` when the class is enclosed by an initializer
    pub method: Option<(UnqualifiedName, MethodDescriptor<BinaryName>)>,
}

/// Semantic representation of a class
#[derive(Clone, Debug)]
pub struct ClassEntity {
    pub version: Version,
    pub access_flags: ClassAccessFlags,
    pub name: BinaryName,

    /// `None` only for `java/lang/Object` (and `module-info`)
    pub superclass: Option<BinaryName>,

    pub interfaces: Vec<BinaryName>,

    /// Fields
    ///
    /// Use [`Self::add_field`] to have the member identity checked
    pub fields: Vec<FieldEntity>,

    /// Methods
    ///
    /// Use [`Self::add_method`] to have the member identity checked
    pub methods: Vec<MethodEntity>,

    pub origin: ClassOrigin,

    pub source_file: Option<String>,
    pub signature: Option<String>,
    pub inner_classes: Vec<InnerClassEntry>,
    pub enclosing_method: Option<EnclosingMethod>,
    pub nest_host: Option<BinaryName>,
    pub nest_members: Vec<BinaryName>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
}

impl ClassEntity {
    /// Create an empty class
    pub fn new(
        name: BinaryName,
        superclass: Option<BinaryName>,
        access_flags: ClassAccessFlags,
        origin: ClassOrigin,
    ) -> ClassEntity {
        ClassEntity {
            version: Version::JAVA8,
            access_flags,
            name,
            superclass,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            origin,
            source_file: None,
            signature: None,
            inner_classes: vec![],
            enclosing_method: None,
            nest_host: None,
            nest_members: vec![],
            visible_annotations: vec![],
            invisible_annotations: vec![],
        }
    }

    /// Name of the archive entry this class is stored under
    pub fn entry_name(&self) -> String {
        format!("{}.class", self.name.as_str())
    }

    /// Add a field, making sure its identity is not already taken
    pub fn add_field(&mut self, field: FieldEntity) -> Result<()> {
        let key = field.key();
        if self.fields.iter().any(|other| other.key() == key) {
            return Err(self.duplicate(&key));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Add a method, making sure its identity is not already taken
    pub fn add_method(&mut self, method: MethodEntity) -> Result<()> {
        let key = method.key();
        if self.methods.iter().any(|other| other.key() == key) {
            return Err(self.duplicate(&key));
        }
        self.methods.push(method);
        Ok(())
    }

    fn duplicate(&self, key: &MemberKey) -> Error {
        Error::DuplicateMember {
            owner: self.name.to_string(),
            name: key.name.to_string(),
            descriptor: key.descriptor.clone(),
        }
    }

    pub fn get_field(&self, name: &str, descriptor: &str) -> Option<&FieldEntity> {
        self.fields
            .iter()
            .find(|field| field.name.as_str() == name && field.descriptor.render() == descriptor)
    }

    pub fn get_method(&self, name: &str, descriptor: &str) -> Option<&MethodEntity> {
        self.methods
            .iter()
            .find(|method| method.name.as_str() == name && method.descriptor.render() == descriptor)
    }

    pub fn get_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodEntity> {
        self.methods
            .iter_mut()
            .find(|method| method.name.as_str() == name && method.descriptor.render() == descriptor)
    }

    /// Pick a method name derived from `base` that does not clash with an existing method of the
    /// same descriptor (`base0`, `base1`, ...)
    pub fn alloc_method_name(
        &self,
        base: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> UnqualifiedName {
        let rendered = descriptor.render();
        (0..)
            .map(|index| base.with_suffix(index))
            .find(|candidate| self.get_method(candidate.as_str(), &rendered).is_none())
            .unwrap_or_else(|| base.clone())
    }

    /// Static initializer of the class, created (as a lone `return`) if missing
    pub fn get_or_create_clinit(&mut self) -> &mut MethodEntity {
        let position = self
            .methods
            .iter()
            .position(|method| method.name == UnqualifiedName::CLINIT);
        let index = match position {
            Some(index) => index,
            None => {
                let mut clinit = MethodEntity::new(
                    MethodAccessFlags::STATIC,
                    UnqualifiedName::CLINIT,
                    MethodDescriptor {
                        parameters: vec![],
                        return_type: None,
                    },
                );
                clinit.code = Some(Code::new(
                    vec![Insn::Simple(RETURN)],
                    SynLabelGenerator::default(),
                ));
                self.methods.push(clinit);
                self.methods.len() - 1
            }
        };
        &mut self.methods[index]
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_enum(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ENUM)
    }

    pub fn is_annotation(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ANNOTATION)
    }

    pub fn is_module(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::MODULE)
    }

    pub fn is_external(&self) -> bool {
        self.origin.is_external()
    }

    /// Is an annotation with the given type descriptor (eg. `Lkotlin/Metadata;`) present?
    pub fn is_annotation_present(&self, descriptor: &str) -> bool {
        self.visible_annotations
            .iter()
            .chain(&self.invisible_annotations)
            .any(|annotation| annotation.type_descriptor.render() == descriptor)
    }

    pub fn is_kotlin(&self) -> bool {
        self.is_annotation_present("Lkotlin/Metadata;")
    }

    pub fn has_native_method(&self) -> bool {
        self.methods.iter().any(MethodEntity::is_native)
    }

    pub fn has_main_method(&self) -> bool {
        self.methods.iter().any(MethodEntity::is_main)
    }

    /// Type of instances of this class
    pub fn field_type(&self) -> FieldType<BinaryName> {
        FieldType::object(self.name.clone())
    }
}
