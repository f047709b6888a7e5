use crate::errors::{Error, Result};
use crate::jvm::class_file::{decode_modified_utf8, ConstantIndex, PoolEntry, Version};
use crate::jvm::code::opcode::*;
use crate::jvm::code::{
    BootstrapMethod, Code, Constant, Handle, HandleKind, Insn, InsnList, LabelGenerator,
    LocalVariable, MemberDescriptor, SynLabel, SynLabelGenerator, TryCatchBlock,
};
use crate::jvm::model::{
    Annotation, ClassEntity, ClassOrigin, ElementValue, EnclosingMethod, FieldEntity,
    InnerClassEntry, MethodEntity,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, InnerClassAccessFlags,
    MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, RefType, UnqualifiedName,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

/// Parse a class file into its semantic representation
///
/// `StackMapTable` and attributes without a counterpart in the model are dropped (they are logged
/// at debug level).
pub fn read_class(bytes: &[u8], origin: ClassOrigin) -> Result<ClassEntity> {
    let context = match &origin {
        ClassOrigin::Target { entry } => entry.clone(),
        ClassOrigin::External { source } => source.clone(),
        ClassOrigin::Synthetic => String::from("<synthetic>"),
    };
    ClassReader {
        input: Input::new(bytes, &context),
        context: &context,
    }
    .read(origin)
}

/// Big-endian cursor whose failures are reported as malformed class errors
struct Input<'a> {
    cursor: Cursor<&'a [u8]>,
    context: &'a str,
}

impl<'a> Input<'a> {
    fn new(bytes: &'a [u8], context: &'a str) -> Input<'a> {
        Input {
            cursor: Cursor::new(bytes),
            context,
        }
    }

    fn eof(&self, what: &str) -> Error {
        Error::malformed(
            self.context,
            format!("unexpected end of data reading {}", what),
        )
    }

    fn position(&self) -> u64 {
        self.cursor.position()
    }

    fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| self.eof("u8"))
    }

    fn i8(&mut self) -> Result<i8> {
        self.cursor.read_i8().map_err(|_| self.eof("i8"))
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| self.eof("u16"))
    }

    fn i16(&mut self) -> Result<i16> {
        self.cursor
            .read_i16::<BigEndian>()
            .map_err(|_| self.eof("i16"))
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| self.eof("u32"))
    }

    fn i32(&mut self) -> Result<i32> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| self.eof("i32"))
    }

    fn i64(&mut self) -> Result<i64> {
        self.cursor
            .read_i64::<BigEndian>()
            .map_err(|_| self.eof("i64"))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.cursor.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        let slice = start
            .checked_add(len)
            .and_then(|end| data.get(start..end))
            .ok_or_else(|| self.eof("bytes"))?;
        self.cursor.set_position((start + len) as u64);
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }
}

/// Constant pool as read from a class file
///
/// Slots are `None` at index 0 and after 8-byte constants.
struct ConstantsTable<'a> {
    entries: Vec<Option<PoolEntry>>,
    context: &'a str,
}

impl<'a> ConstantsTable<'a> {
    fn parse(input: &mut Input<'a>, context: &'a str) -> Result<ConstantsTable<'a>> {
        let count = input.u16()?;
        let mut entries: Vec<Option<PoolEntry>> = vec![None];
        while entries.len() < count as usize {
            let tag = input.u8()?;
            let entry = match tag {
                PoolEntry::UTF8 => {
                    let len = input.u16()? as usize;
                    let bytes = input.bytes(len)?;
                    let string = decode_modified_utf8(bytes)
                        .map_err(|msg| Error::malformed(context, msg))?;
                    PoolEntry::Utf8(string)
                }
                PoolEntry::INTEGER => PoolEntry::Integer(input.i32()?),
                PoolEntry::FLOAT => PoolEntry::Float(input.u32()?),
                PoolEntry::LONG => PoolEntry::Long(input.i64()?),
                PoolEntry::DOUBLE => PoolEntry::Double(input.i64()? as u64),
                PoolEntry::CLASS => PoolEntry::Class(ConstantIndex(input.u16()?)),
                PoolEntry::STRING => PoolEntry::String(ConstantIndex(input.u16()?)),
                PoolEntry::FIELDREF | PoolEntry::METHODREF | PoolEntry::INTERFACE_METHODREF => {
                    let class = ConstantIndex(input.u16()?);
                    let name_and_type = ConstantIndex(input.u16()?);
                    if tag == PoolEntry::FIELDREF {
                        PoolEntry::FieldRef {
                            class,
                            name_and_type,
                        }
                    } else {
                        PoolEntry::MethodRef {
                            class,
                            name_and_type,
                            is_interface: tag == PoolEntry::INTERFACE_METHODREF,
                        }
                    }
                }
                PoolEntry::NAME_AND_TYPE => PoolEntry::NameAndType {
                    name: ConstantIndex(input.u16()?),
                    descriptor: ConstantIndex(input.u16()?),
                },
                PoolEntry::METHOD_HANDLE => PoolEntry::MethodHandle {
                    kind: input.u8()?,
                    member: ConstantIndex(input.u16()?),
                },
                PoolEntry::METHOD_TYPE => PoolEntry::MethodType(ConstantIndex(input.u16()?)),
                PoolEntry::DYNAMIC => PoolEntry::Dynamic {
                    bootstrap_method: input.u16()?,
                    name_and_type: ConstantIndex(input.u16()?),
                },
                PoolEntry::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
                    bootstrap_method: input.u16()?,
                    name_and_type: ConstantIndex(input.u16()?),
                },
                PoolEntry::MODULE => PoolEntry::Module(ConstantIndex(input.u16()?)),
                PoolEntry::PACKAGE => PoolEntry::Package(ConstantIndex(input.u16()?)),
                _ => {
                    return Err(Error::UnsupportedConstant {
                        entry: context.to_owned(),
                        tag,
                    })
                }
            };
            let width = entry.width();
            entries.push(Some(entry));
            if width == 2 {
                entries.push(None);
            }
        }
        Ok(ConstantsTable { entries, context })
    }

    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.context, message)
    }

    fn get(&self, index: u16) -> Result<&PoolEntry> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.malformed(format!("invalid constant pool index {}", index)))
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            PoolEntry::Utf8(string) => Ok(string),
            other => Err(self.malformed(format!("expected Utf8 at {}, got {:?}", index, other))),
        }
    }

    fn optional_utf8(&self, index: u16) -> Result<Option<&str>> {
        if index == 0 {
            Ok(None)
        } else {
            self.utf8(index).map(Some)
        }
    }

    fn unqualified_name(&self, index: u16) -> Result<UnqualifiedName> {
        let name = self.utf8(index)?;
        UnqualifiedName::from_string(name.to_owned()).map_err(|msg| self.malformed(msg))
    }

    fn class_utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            PoolEntry::Class(name) => self.utf8(name.0),
            other => Err(self.malformed(format!("expected Class at {}, got {:?}", index, other))),
        }
    }

    fn class_name(&self, index: u16) -> Result<BinaryName> {
        let name = self.class_utf8(index)?;
        BinaryName::from_string(name.to_owned()).map_err(|msg| self.malformed(msg))
    }

    fn optional_class_name(&self, index: u16) -> Result<Option<BinaryName>> {
        if index == 0 {
            Ok(None)
        } else {
            self.class_name(index).map(Some)
        }
    }

    fn ref_type(&self, index: u16) -> Result<RefType<BinaryName>> {
        let name = self.class_utf8(index)?;
        RefType::parse_class_constant(name).map_err(|err| self.malformed(err.to_string()))
    }

    fn field_type(&self, descriptor: &str) -> Result<FieldType<BinaryName>> {
        FieldType::parse(descriptor).map_err(|err| {
            self.malformed(format!("bad field descriptor {:?}: {}", descriptor, err))
        })
    }

    fn method_descriptor(&self, descriptor: &str) -> Result<MethodDescriptor<BinaryName>> {
        MethodDescriptor::parse(descriptor).map_err(|err| {
            self.malformed(format!("bad method descriptor {:?}: {}", descriptor, err))
        })
    }

    fn name_and_type(&self, index: u16) -> Result<(UnqualifiedName, &str)> {
        match self.get(index)? {
            PoolEntry::NameAndType { name, descriptor } => {
                Ok((self.unqualified_name(name.0)?, self.utf8(descriptor.0)?))
            }
            other => Err(self.malformed(format!(
                "expected NameAndType at {}, got {:?}",
                index, other
            ))),
        }
    }

    fn field_ref(&self, index: u16) -> Result<(BinaryName, UnqualifiedName, FieldType<BinaryName>)> {
        match self.get(index)? {
            PoolEntry::FieldRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(name_and_type.0)?;
                Ok((self.class_name(class.0)?, name, self.field_type(descriptor)?))
            }
            other => Err(self.malformed(format!("expected Fieldref at {}, got {:?}", index, other))),
        }
    }

    #[allow(clippy::type_complexity)]
    fn method_ref(
        &self,
        index: u16,
    ) -> Result<(
        RefType<BinaryName>,
        UnqualifiedName,
        MethodDescriptor<BinaryName>,
        bool,
    )> {
        match self.get(index)? {
            PoolEntry::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let (name, descriptor) = self.name_and_type(name_and_type.0)?;
                Ok((
                    self.ref_type(class.0)?,
                    name,
                    self.method_descriptor(descriptor)?,
                    *is_interface,
                ))
            }
            other => Err(self.malformed(format!("expected Methodref at {}, got {:?}", index, other))),
        }
    }

    fn handle(&self, index: u16) -> Result<Handle> {
        let (kind, member) = match self.get(index)? {
            PoolEntry::MethodHandle { kind, member } => (*kind, member.0),
            other => {
                return Err(self.malformed(format!(
                    "expected MethodHandle at {}, got {:?}",
                    index, other
                )))
            }
        };
        let kind = HandleKind::from_u8(kind)
            .ok_or_else(|| self.malformed(format!("invalid method handle kind {}", kind)))?;
        if kind.is_field() {
            let (owner, name, descriptor) = self.field_ref(member)?;
            Ok(Handle {
                kind,
                owner,
                name,
                descriptor: MemberDescriptor::Field(descriptor),
                is_interface: false,
            })
        } else {
            let (owner, name, descriptor, is_interface) = self.method_ref(member)?;
            let owner = match owner {
                RefType::Object(owner) => owner,
                other => {
                    return Err(self.malformed(format!(
                        "method handle on array type {:?}",
                        other
                    )))
                }
            };
            Ok(Handle {
                kind,
                owner,
                name,
                descriptor: MemberDescriptor::Method(descriptor),
                is_interface,
            })
        }
    }

    /// Constant usable with `ldc`, as a bootstrap argument, or as a `ConstantValue`
    fn loadable(&self, index: u16) -> Result<Constant> {
        let entry = self.get(index)?;
        Ok(match entry {
            PoolEntry::Integer(integer) => Constant::Integer(*integer),
            PoolEntry::Float(bits) => Constant::Float(f32::from_bits(*bits)),
            PoolEntry::Long(long) => Constant::Long(*long),
            PoolEntry::Double(bits) => Constant::Double(f64::from_bits(*bits)),
            PoolEntry::String(utf8) => Constant::String(self.utf8(utf8.0)?.to_owned()),
            PoolEntry::Class(_) => Constant::Class(self.ref_type(index)?),
            PoolEntry::MethodType(descriptor) => {
                Constant::MethodType(self.method_descriptor(self.utf8(descriptor.0)?)?)
            }
            PoolEntry::MethodHandle { .. } => Constant::MethodHandle(self.handle(index)?),
            other => {
                return Err(Error::UnsupportedConstant {
                    entry: self.context.to_owned(),
                    tag: other.tag(),
                })
            }
        })
    }
}

/// Raw attribute: name and undecoded body
struct RawAttribute<'a> {
    name: String,
    info: &'a [u8],
}

/// Field or method whose attributes have not been decoded yet
struct RawMember<'a> {
    access_flags: u16,
    name: UnqualifiedName,
    descriptor: String,
    attributes: Vec<RawAttribute<'a>>,
}

struct ClassReader<'a> {
    input: Input<'a>,
    context: &'a str,
}

impl<'a> ClassReader<'a> {
    fn read(mut self, origin: ClassOrigin) -> Result<ClassEntity> {
        if self.input.u32()? != 0xCAFE_BABE {
            return Err(Error::malformed(self.context, "bad magic number"));
        }
        let minor_version = self.input.u16()?;
        let major_version = self.input.u16()?;
        let constants = ConstantsTable::parse(&mut self.input, self.context)?;

        let access_flags = ClassAccessFlags::from_bits_truncate(self.input.u16()?);
        let name = constants.class_name(self.input.u16()?)?;
        let superclass = constants.optional_class_name(self.input.u16()?)?;
        let interface_count = self.input.u16()?;
        let interfaces = (0..interface_count)
            .map(|_| constants.class_name(self.input.u16()?))
            .collect::<Result<Vec<_>>>()?;

        let fields = self.raw_members(&constants)?;
        let methods = self.raw_members(&constants)?;
        let attributes = self.raw_attributes(&constants)?;

        let mut class = ClassEntity::new(name, superclass, access_flags, origin);
        class.version = Version {
            minor_version,
            major_version,
        };
        class.interfaces = interfaces;

        let mut bootstrap_methods = vec![];
        for attribute in &attributes {
            let mut input = Input::new(attribute.info, self.context);
            match attribute.name.as_str() {
                "SourceFile" => {
                    class.source_file = Some(constants.utf8(input.u16()?)?.to_owned());
                }
                "Signature" => class.signature = Some(constants.utf8(input.u16()?)?.to_owned()),
                "InnerClasses" => {
                    for _ in 0..input.u16()? {
                        let inner_class = constants.class_name(input.u16()?)?;
                        let outer_class = constants.optional_class_name(input.u16()?)?;
                        let inner_name = match input.u16()? {
                            0 => None,
                            index => Some(constants.unqualified_name(index)?),
                        };
                        let access_flags = InnerClassAccessFlags::from_bits_truncate(input.u16()?);
                        class.inner_classes.push(InnerClassEntry {
                            inner_class,
                            outer_class,
                            inner_name,
                            access_flags,
                        });
                    }
                }
                "EnclosingMethod" => {
                    let enclosing = constants.class_name(input.u16()?)?;
                    let method = match input.u16()? {
                        0 => None,
                        index => {
                            let (name, descriptor) = constants.name_and_type(index)?;
                            Some((name, constants.method_descriptor(descriptor)?))
                        }
                    };
                    class.enclosing_method = Some(EnclosingMethod {
                        class: enclosing,
                        method,
                    });
                }
                "NestHost" => class.nest_host = Some(constants.class_name(input.u16()?)?),
                "NestMembers" => {
                    for _ in 0..input.u16()? {
                        class.nest_members.push(constants.class_name(input.u16()?)?);
                    }
                }
                "RuntimeVisibleAnnotations" => {
                    class.visible_annotations = annotations(&mut input, &constants)?
                }
                "RuntimeInvisibleAnnotations" => {
                    class.invisible_annotations = annotations(&mut input, &constants)?
                }
                "BootstrapMethods" => {
                    for _ in 0..input.u16()? {
                        let handle = constants.handle(input.u16()?)?;
                        let argument_count = input.u16()?;
                        let arguments = (0..argument_count)
                            .map(|_| constants.loadable(input.u16()?))
                            .collect::<Result<Vec<_>>>()?;
                        bootstrap_methods.push(BootstrapMethod { handle, arguments });
                    }
                }
                other => log::debug!("{}: dropping class attribute {}", self.context, other),
            }
        }

        for raw in fields {
            class.fields.push(self.field(raw, &constants)?);
        }
        for raw in methods {
            class
                .methods
                .push(self.method(raw, &constants, &bootstrap_methods)?);
        }
        Ok(class)
    }

    fn raw_attributes(&mut self, constants: &ConstantsTable<'a>) -> Result<Vec<RawAttribute<'a>>> {
        let count = self.input.u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_index = self.input.u16()?;
            let len = self.input.u32()? as usize;
            let info = self.input.bytes(len)?;
            attributes.push(RawAttribute {
                name: constants.utf8(name_index)?.to_owned(),
                info,
            });
        }
        Ok(attributes)
    }

    fn raw_members(&mut self, constants: &ConstantsTable<'a>) -> Result<Vec<RawMember<'a>>> {
        let count = self.input.u16()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let access_flags = self.input.u16()?;
            let name = constants.unqualified_name(self.input.u16()?)?;
            let descriptor = constants.utf8(self.input.u16()?)?.to_owned();
            let attributes = self.raw_attributes(constants)?;
            members.push(RawMember {
                access_flags,
                name,
                descriptor,
                attributes,
            });
        }
        Ok(members)
    }

    fn field(&self, raw: RawMember<'a>, constants: &ConstantsTable<'a>) -> Result<FieldEntity> {
        let mut field = FieldEntity::new(
            FieldAccessFlags::from_bits_truncate(raw.access_flags),
            raw.name,
            constants.field_type(&raw.descriptor)?,
        );
        for attribute in &raw.attributes {
            let mut input = Input::new(attribute.info, self.context);
            match attribute.name.as_str() {
                "ConstantValue" => field.constant_value = Some(constants.loadable(input.u16()?)?),
                "Signature" => field.signature = Some(constants.utf8(input.u16()?)?.to_owned()),
                "RuntimeVisibleAnnotations" => {
                    field.visible_annotations = annotations(&mut input, constants)?
                }
                "RuntimeInvisibleAnnotations" => {
                    field.invisible_annotations = annotations(&mut input, constants)?
                }
                other => log::debug!(
                    "{}: dropping attribute {} of field {}",
                    self.context,
                    other,
                    field.name
                ),
            }
        }
        Ok(field)
    }

    fn method(
        &self,
        raw: RawMember<'a>,
        constants: &ConstantsTable<'a>,
        bootstrap_methods: &[BootstrapMethod],
    ) -> Result<MethodEntity> {
        let mut method = MethodEntity::new(
            MethodAccessFlags::from_bits_truncate(raw.access_flags),
            raw.name,
            constants.method_descriptor(&raw.descriptor)?,
        );
        for attribute in &raw.attributes {
            let mut input = Input::new(attribute.info, self.context);
            match attribute.name.as_str() {
                "Code" => {
                    let decoder = CodeDecoder {
                        constants,
                        bootstrap_methods,
                        context: self.context,
                        labels: HashMap::new(),
                        generator: SynLabelGenerator::default(),
                    };
                    method.code = Some(decoder.decode(&mut input)?);
                }
                "Exceptions" => {
                    for _ in 0..input.u16()? {
                        method.exceptions.push(constants.class_name(input.u16()?)?);
                    }
                }
                "Signature" => method.signature = Some(constants.utf8(input.u16()?)?.to_owned()),
                "AnnotationDefault" => {
                    method.annotation_default = Some(element_value(&mut input, constants)?)
                }
                "RuntimeVisibleAnnotations" => {
                    method.visible_annotations = annotations(&mut input, constants)?
                }
                "RuntimeInvisibleAnnotations" => {
                    method.invisible_annotations = annotations(&mut input, constants)?
                }
                other => log::debug!(
                    "{}: dropping attribute {} of method {}",
                    self.context,
                    other,
                    method.name
                ),
            }
        }
        Ok(method)
    }
}

fn annotations(input: &mut Input, constants: &ConstantsTable) -> Result<Vec<Annotation>> {
    let count = input.u16()?;
    (0..count).map(|_| annotation(input, constants)).collect()
}

fn annotation(input: &mut Input, constants: &ConstantsTable) -> Result<Annotation> {
    let type_descriptor = constants.field_type(constants.utf8(input.u16()?)?)?;
    let pair_count = input.u16()?;
    let mut elements = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let name = constants.utf8(input.u16()?)?.to_owned();
        elements.push((name, element_value(input, constants)?));
    }
    Ok(Annotation {
        type_descriptor,
        elements,
    })
}

fn element_value(input: &mut Input, constants: &ConstantsTable) -> Result<ElementValue> {
    let tag = input.u8()?;
    Ok(match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => ElementValue::Const {
            tag,
            value: constants.loadable(input.u16()?)?,
        },
        b's' => ElementValue::Const {
            tag,
            value: Constant::String(constants.utf8(input.u16()?)?.to_owned()),
        },
        b'e' => ElementValue::Enum {
            type_descriptor: constants.field_type(constants.utf8(input.u16()?)?)?,
            const_name: constants.utf8(input.u16()?)?.to_owned(),
        },
        b'c' => match constants.utf8(input.u16()?)? {
            "V" => ElementValue::Class(None),
            descriptor => ElementValue::Class(Some(constants.field_type(descriptor)?)),
        },
        b'@' => ElementValue::Annotation(annotation(input, constants)?),
        b'[' => {
            let count = input.u16()?;
            ElementValue::Array(
                (0..count)
                    .map(|_| element_value(input, constants))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        other => {
            return Err(constants.malformed(format!(
                "invalid element value tag {:?}",
                other as char
            )))
        }
    })
}

/// Turns a `Code` attribute into labelled instructions
struct CodeDecoder<'a, 'c> {
    constants: &'c ConstantsTable<'a>,
    bootstrap_methods: &'c [BootstrapMethod],
    context: &'a str,
    labels: HashMap<u32, SynLabel>,
    generator: SynLabelGenerator,
}

impl<'a, 'c> CodeDecoder<'a, 'c> {
    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.context, message)
    }

    /// Label for a bytecode offset, created on first use
    fn label_at(&mut self, offset: i64, code_length: u32) -> Result<SynLabel> {
        if offset < 0 || offset > code_length as i64 {
            return Err(self.malformed(format!("branch to out-of-range offset {}", offset)));
        }
        let generator = &self.generator;
        Ok(*self
            .labels
            .entry(offset as u32)
            .or_insert_with(|| generator.fresh_label()))
    }

    fn decode(mut self, input: &mut Input<'a>) -> Result<Code> {
        let max_stack = input.u16()?;
        let max_locals = input.u16()?;
        let code_length = input.u32()?;
        let bytecode = input.bytes(code_length as usize)?;

        let mut decoded: Vec<(u32, Insn)> = vec![];
        let mut code = Input::new(bytecode, self.context);
        while (code.position() as u32) < code_length {
            let offset = code.position() as u32;
            let insn = self.instruction(&mut code, offset, code_length)?;
            decoded.push((offset, insn));
        }

        let mut try_catch_blocks = vec![];
        for _ in 0..input.u16()? {
            let start = self.label_at(input.u16()? as i64, code_length)?;
            let end = self.label_at(input.u16()? as i64, code_length)?;
            let handler = self.label_at(input.u16()? as i64, code_length)?;
            let catch_type = self.constants.optional_class_name(input.u16()?)?;
            try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler,
                catch_type,
            });
        }

        let mut line_numbers: HashMap<u32, Vec<u16>> = HashMap::new();
        let mut local_variables = vec![];
        for _ in 0..input.u16()? {
            let name = self.constants.utf8(input.u16()?)?;
            let len = input.u32()? as usize;
            let mut attribute = Input::new(input.bytes(len)?, self.context);
            match name {
                "LineNumberTable" => {
                    for _ in 0..attribute.u16()? {
                        let start = attribute.u16()? as u32;
                        let line = attribute.u16()?;
                        self.label_at(start as i64, code_length)?;
                        line_numbers.entry(start).or_default().push(line);
                    }
                }
                "LocalVariableTable" => {
                    for _ in 0..attribute.u16()? {
                        let start_pc = attribute.u16()? as i64;
                        let length = attribute.u16()? as i64;
                        let start = self.label_at(start_pc, code_length)?;
                        let end = self.label_at(start_pc + length, code_length)?;
                        let name = self.constants.utf8(attribute.u16()?)?.to_owned();
                        let descriptor = self
                            .constants
                            .field_type(self.constants.utf8(attribute.u16()?)?)?;
                        let index = attribute.u16()?;
                        local_variables.push(LocalVariable {
                            name,
                            descriptor,
                            start,
                            end,
                            index,
                        });
                    }
                }
                other => log::debug!("{}: dropping code attribute {}", self.context, other),
            }
        }

        let mut instructions = InsnList::new();
        let mut placed = 0;
        for (offset, insn) in decoded {
            if let Some(label) = self.labels.get(&offset) {
                instructions.push_back(Insn::Label(*label));
                placed += 1;
                for line in line_numbers.get(&offset).into_iter().flatten() {
                    instructions.push_back(Insn::LineNumber {
                        line: *line,
                        start: *label,
                    });
                }
            }
            instructions.push_back(insn);
        }
        if let Some(label) = self.labels.get(&code_length) {
            instructions.push_back(Insn::Label(*label));
            placed += 1;
        }
        if placed != self.labels.len() {
            return Err(self.malformed("label in the middle of an instruction"));
        }

        Ok(Code {
            max_stack,
            max_locals,
            instructions,
            try_catch_blocks,
            local_variables,
            labels: self.generator,
            frames: None,
        })
    }

    fn jump_target(&mut self, offset: u32, delta: i64, code_length: u32) -> Result<SynLabel> {
        self.label_at(offset as i64 + delta, code_length)
    }

    fn instruction(&mut self, code: &mut Input<'a>, offset: u32, code_length: u32) -> Result<Insn> {
        let opcode = code.u8()?;
        let constants = self.constants;
        Ok(match opcode {
            NOP..=DCONST_1
            | IALOAD..=SALOAD
            | IASTORE..=LXOR
            | I2L..=DCMPG
            | IRETURN..=RETURN
            | ARRAYLENGTH
            | ATHROW
            | MONITORENTER
            | MONITOREXIT => Insn::Simple(opcode),
            BIPUSH => Insn::Int {
                opcode,
                operand: code.i8()? as i32,
            },
            SIPUSH => Insn::Int {
                opcode,
                operand: code.i16()? as i32,
            },
            NEWARRAY => Insn::Int {
                opcode,
                operand: code.u8()? as i32,
            },
            LDC => Insn::Ldc(constants.loadable(code.u8()? as u16)?),
            LDC_W | LDC2_W => Insn::Ldc(constants.loadable(code.u16()?)?),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                opcode,
                index: code.u8()? as u16,
            },
            ILOAD_0..=ALOAD_3 => Insn::Var {
                opcode: ILOAD + (opcode - ILOAD_0) / 4,
                index: ((opcode - ILOAD_0) % 4) as u16,
            },
            ISTORE_0..=ASTORE_3 => Insn::Var {
                opcode: ISTORE + (opcode - ISTORE_0) / 4,
                index: ((opcode - ISTORE_0) % 4) as u16,
            },
            IINC => Insn::Iinc {
                index: code.u8()? as u16,
                increment: code.i8()? as i16,
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let delta = code.i16()? as i64;
                Insn::Jump {
                    opcode,
                    target: self.jump_target(offset, delta, code_length)?,
                }
            }
            GOTO_W | JSR_W => {
                let delta = code.i32()? as i64;
                Insn::Jump {
                    opcode: if opcode == GOTO_W { GOTO } else { JSR },
                    target: self.jump_target(offset, delta, code_length)?,
                }
            }
            TABLESWITCH | LOOKUPSWITCH => {
                let padding = (4 - (offset + 1) % 4) % 4;
                code.skip(padding as usize)?;
                let default = self.jump_target(offset, code.i32()? as i64, code_length)?;
                if opcode == TABLESWITCH {
                    let low = code.i32()?;
                    let high = code.i32()?;
                    if high < low {
                        return Err(self.malformed("tableswitch with high < low"));
                    }
                    let mut targets = vec![];
                    for _ in low..=high {
                        targets.push(self.jump_target(offset, code.i32()? as i64, code_length)?);
                    }
                    Insn::TableSwitch {
                        low,
                        high,
                        default,
                        targets,
                    }
                } else {
                    let count = code.i32()?;
                    if count < 0 {
                        return Err(self.malformed("lookupswitch with negative pair count"));
                    }
                    let mut pairs = vec![];
                    for _ in 0..count {
                        let key = code.i32()?;
                        pairs.push((key, self.jump_target(offset, code.i32()? as i64, code_length)?));
                    }
                    Insn::LookupSwitch { default, pairs }
                }
            }
            GETSTATIC..=PUTFIELD => {
                let (owner, name, descriptor) = constants.field_ref(code.u16()?)?;
                Insn::Field {
                    opcode,
                    owner,
                    name,
                    descriptor,
                }
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let (owner, name, descriptor, is_interface) = constants.method_ref(code.u16()?)?;
                if opcode == INVOKEINTERFACE {
                    code.skip(2)?;
                }
                Insn::Method {
                    opcode,
                    owner,
                    name,
                    descriptor,
                    is_interface,
                }
            }
            INVOKEDYNAMIC => {
                let index = code.u16()?;
                code.skip(2)?;
                let (bootstrap_method, name_and_type) = match constants.get(index)? {
                    PoolEntry::InvokeDynamic {
                        bootstrap_method,
                        name_and_type,
                    } => (*bootstrap_method, *name_and_type),
                    other => {
                        return Err(Error::UnsupportedConstant {
                            entry: self.context.to_owned(),
                            tag: other.tag(),
                        })
                    }
                };
                let (name, descriptor) = constants.name_and_type(name_and_type.0)?;
                let bootstrap = self
                    .bootstrap_methods
                    .get(bootstrap_method as usize)
                    .cloned()
                    .ok_or_else(|| self.malformed("invokedynamic without bootstrap method"))?;
                Insn::InvokeDynamic {
                    name,
                    descriptor: constants.method_descriptor(descriptor)?,
                    bootstrap,
                }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Insn::Type {
                opcode,
                class: constants.ref_type(code.u16()?)?,
            },
            MULTIANEWARRAY => Insn::MultiANewArray {
                class: constants.ref_type(code.u16()?)?,
                dimensions: code.u8()?,
            },
            WIDE => {
                let modified = code.u8()?;
                match modified {
                    IINC => Insn::Iinc {
                        index: code.u16()?,
                        increment: code.i16()?,
                    },
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                        opcode: modified,
                        index: code.u16()?,
                    },
                    other => {
                        return Err(self.malformed(format!(
                            "wide applied to {}",
                            mnemonic(other)
                        )))
                    }
                }
            }
            other => {
                return Err(self.malformed(format!(
                    "invalid opcode 0x{:02x} at offset {}",
                    other, offset
                )))
            }
        })
    }
}
