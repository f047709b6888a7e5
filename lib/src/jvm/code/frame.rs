use crate::jvm::code::InsnId;
use crate::jvm::model::MethodEntity;
use crate::jvm::{BaseType, BinaryName, FieldType, RefType, UnqualifiedName};

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.10.1.2
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable slot (also the second half of a `long` or `double` while frames are computed)
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,

    /// In a constructor, `this` starts with this type and turns into an object type once the
    /// super constructor has been called
    UninitializedThis,

    Object(RefType<BinaryName>),

    /// Result of the given `new` instruction, before its constructor has been called
    Uninitialized(InsnId),
}

impl VerificationType {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    pub fn object(class: BinaryName) -> VerificationType {
        VerificationType::Object(RefType::Object(class))
    }
}

impl From<&FieldType<BinaryName>> for VerificationType {
    fn from(field_type: &FieldType<BinaryName>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type.clone()),
        }
    }
}

/// Stack map frame for the instruction `at`
///
/// Locals and stack are listed the way the `StackMapTable` lists them: a `long` or `double` is a
/// single entry, and trailing unusable locals are left out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub at: InsnId,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Locals on entry to a method (the implicit first frame)
    pub fn initial_locals(owner: &BinaryName, method: &MethodEntity) -> Vec<VerificationType> {
        let mut locals = vec![];
        if !method.is_static() {
            let is_constructor = method.name == UnqualifiedName::INIT;
            if is_constructor && *owner != BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::object(owner.clone()));
            }
        }
        locals.extend(method.descriptor.parameters.iter().map(VerificationType::from));
        locals
    }
}

/// Expand a frame listing so that wide values take two slots (the second one `Top`)
pub fn to_slots(types: &[VerificationType]) -> Vec<VerificationType> {
    let mut slots = Vec::with_capacity(types.len());
    for vtype in types {
        slots.push(vtype.clone());
        if vtype.is_wide() {
            slots.push(VerificationType::Top);
        }
    }
    slots
}

/// Collapse slots back into a frame listing
pub fn from_slots(slots: &[VerificationType]) -> Vec<VerificationType> {
    let mut types = vec![];
    let mut iter = slots.iter();
    while let Some(vtype) = iter.next() {
        types.push(vtype.clone());
        if vtype.is_wide() {
            iter.next();
        }
    }
    types
}
