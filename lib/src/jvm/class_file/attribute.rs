use crate::jvm::class_file::{ConstantIndex, ConstantsPool, Serialize, Version};
use crate::jvm::ClassAccessFlags;
use byteorder::WriteBytesExt;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Only the encoded form is kept here: the writer lowers every attribute of the model into a
/// name and an opaque body.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug)]
pub struct Attribute {
    pub name_index: ConstantIndex,
    pub info: Vec<u8>,
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

/// Encoded field or method
#[derive(Debug)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Serialize for MemberInfo {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ConstantIndex,

    /// `None` only for `java/lang/Object`
    pub super_class: Option<ConstantIndex>,
    pub interfaces: Vec<ConstantIndex>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class
            .unwrap_or(ConstantIndex(0))
            .serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

/// Verification type as encoded in a `StackMapTable`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.4
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(ConstantIndex),

    /// Offset of the `new` instruction that created the value
    Uninitialized(u16),
}

impl Serialize for VerificationTypeInfo {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationTypeInfo::Top => 0u8.serialize(writer)?,
            VerificationTypeInfo::Integer => 1u8.serialize(writer)?,
            VerificationTypeInfo::Float => 2u8.serialize(writer)?,
            VerificationTypeInfo::Double => 3u8.serialize(writer)?,
            VerificationTypeInfo::Long => 4u8.serialize(writer)?,
            VerificationTypeInfo::Null => 5u8.serialize(writer)?,
            VerificationTypeInfo::UninitializedThis => 6u8.serialize(writer)?,
            VerificationTypeInfo::Object(class) => {
                7u8.serialize(writer)?;
                class.serialize(writer)?;
            }
            VerificationTypeInfo::Uninitialized(offset) => {
                8u8.serialize(writer)?;
                offset.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// One entry of a `StackMapTable`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Same locals as the previous frame and an empty stack (tags 0-63 or 251)
    SameLocalsNoStack { offset_delta: u16 },

    /// Same locals as the previous frame and one stack item (tags 64-127 or 247)
    SameLocalsOneStack {
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },

    /// The previous frame without its last `chopped_k` locals, which must be 1 to 3 (tags 248-250)
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// The previous frame with 1 to 3 extra locals (tags 252-254)
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
    },

    /// Exactly the locals and stack specified (tag 255)
    Full {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
        stack: Vec<VerificationTypeInfo>,
    },
}

impl StackMapFrame {
    /// Most compact frame that encodes the transition from the previous frame's locals
    pub fn between(
        offset_delta: u16,
        previous_locals: &[VerificationTypeInfo],
        locals: &[VerificationTypeInfo],
        stack: &[VerificationTypeInfo],
    ) -> StackMapFrame {
        match stack.len() {
            0 if locals.len() <= previous_locals.len() => {
                let chopped_k = previous_locals.len() - locals.len();
                if chopped_k < 4 && previous_locals.starts_with(locals) {
                    if chopped_k == 0 {
                        return StackMapFrame::SameLocalsNoStack { offset_delta };
                    }
                    return StackMapFrame::ChopLocalsNoStack {
                        offset_delta,
                        chopped_k: chopped_k as u8,
                    };
                }
            }
            0 => {
                let added = &locals[previous_locals.len()..];
                if added.len() < 4 && locals.starts_with(previous_locals) {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: added.to_vec(),
                    };
                }
            }
            1 if locals == previous_locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: stack[0].clone(),
                }
            }
            _ => (),
        }
        StackMapFrame::Full {
            offset_delta,
            locals: locals.to_vec(),
            stack: stack.to_vec(),
        }
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and its extended form
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                (251 + locals.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn picks_compact_frames() {
        let int = VerificationTypeInfo::Integer;
        let object = VerificationTypeInfo::Object(ConstantIndex(7));
        let two = [int.clone(), object.clone()];

        assert_eq!(
            StackMapFrame::between(3, &two, &two, &[]),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );
        assert_eq!(
            StackMapFrame::between(3, &two, &two[..1], &[]),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            StackMapFrame::between(3, &two[..1], &two, &[]),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 3,
                locals: vec![object.clone()]
            }
        );
        assert_eq!(
            StackMapFrame::between(3, &two, &two, &[int.clone()]),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: int.clone()
            }
        );
        assert!(matches!(
            StackMapFrame::between(3, &[object.clone()], &[int.clone()], &[]),
            StackMapFrame::Full { .. }
        ));

        let mut bytes = vec![];
        StackMapFrame::between(100, &two, &two, &[object])
            .serialize(&mut bytes)
            .unwrap();
        assert_eq!(bytes, vec![247, 0, 100, 7, 0, 7]);
    }
}
