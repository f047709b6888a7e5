use crate::jvm::class_file::Serialize;
use crate::jvm::code::{Constant, Handle, MemberDescriptor};
use crate::jvm::{BinaryName, Name, RefType, RenderDescriptor};
use byteorder::WriteBytesExt;
use std::collections::HashMap;

/// Index into the constant pool (the first valid index is 1)
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// Constants as they appear in the constant pool
///
/// Floating point values are kept as their bit patterns so that entries can be hashed (and so
/// that `NaN`s with different payloads stay distinct).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the null character
    /// `\u{0000}` and the encoding of supplementary characters is different).
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(ConstantIndex),
    String(ConstantIndex),
    FieldRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
    },

    /// This combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
        is_interface: bool,
    },
    NameAndType {
        name: ConstantIndex,
        descriptor: ConstantIndex,
    },
    MethodHandle {
        kind: u8,
        member: ConstantIndex,
    },
    MethodType(ConstantIndex),

    /// Dynamically-computed constant (read, but never produced)
    Dynamic {
        bootstrap_method: u16,
        name_and_type: ConstantIndex,
    },
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: ConstantIndex,
    },

    /// Module and package names (only valid in `module-info`)
    Module(ConstantIndex),
    Package(ConstantIndex),
}

impl PoolEntry {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;

    pub fn tag(&self) -> u8 {
        match self {
            PoolEntry::Utf8(_) => Self::UTF8,
            PoolEntry::Integer(_) => Self::INTEGER,
            PoolEntry::Float(_) => Self::FLOAT,
            PoolEntry::Long(_) => Self::LONG,
            PoolEntry::Double(_) => Self::DOUBLE,
            PoolEntry::Class(_) => Self::CLASS,
            PoolEntry::String(_) => Self::STRING,
            PoolEntry::FieldRef { .. } => Self::FIELDREF,
            PoolEntry::MethodRef {
                is_interface: false,
                ..
            } => Self::METHODREF,
            PoolEntry::MethodRef {
                is_interface: true, ..
            } => Self::INTERFACE_METHODREF,
            PoolEntry::NameAndType { .. } => Self::NAME_AND_TYPE,
            PoolEntry::MethodHandle { .. } => Self::METHOD_HANDLE,
            PoolEntry::MethodType(_) => Self::METHOD_TYPE,
            PoolEntry::Dynamic { .. } => Self::DYNAMIC,
            PoolEntry::InvokeDynamic { .. } => Self::INVOKE_DYNAMIC,
            PoolEntry::Module(_) => Self::MODULE,
            PoolEntry::Package(_) => Self::PACKAGE,
        }
    }

    /// Almost all constants have width 1, except for `Long` and `Double`. Quoting the JVM spec:
    ///
    /// > All 8-byte constants take up two entries in the constant_pool table of the class file.
    /// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
    pub fn width(&self) -> u16 {
        match self {
            PoolEntry::Long(_) | PoolEntry::Double(_) => 2,
            _ => 1,
        }
    }
}

impl Serialize for PoolEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().serialize(writer)?;
        match self {
            PoolEntry::Utf8(string) => {
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            PoolEntry::Integer(integer) => integer.serialize(writer)?,
            PoolEntry::Float(bits) => bits.serialize(writer)?,
            PoolEntry::Long(long) => long.serialize(writer)?,
            PoolEntry::Double(bits) => (*bits as i64).serialize(writer)?,
            PoolEntry::Class(index)
            | PoolEntry::String(index)
            | PoolEntry::MethodType(index)
            | PoolEntry::Module(index)
            | PoolEntry::Package(index) => index.serialize(writer)?,
            PoolEntry::FieldRef {
                class,
                name_and_type,
            }
            | PoolEntry::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            PoolEntry::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            PoolEntry::MethodHandle { kind, member } => {
                kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            PoolEntry::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | PoolEntry::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// The pool ran out of indices
#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub offset: u16,
}

/// Class file constants pool builder
///
/// The pool is append only and deduplicating: asking for the same constant twice yields the same
/// index. Bootstrap methods are collected alongside, since `invokedynamic` constants refer to
/// them by position.
pub struct ConstantsPool {
    constants: Vec<PoolEntry>,
    next_offset: u16,
    indices: HashMap<PoolEntry, ConstantIndex>,
    bootstrap_methods: Vec<(ConstantIndex, Vec<ConstantIndex>)>,
    bootstrap_indices: HashMap<(ConstantIndex, Vec<ConstantIndex>), u16>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: vec![],
            next_offset: 1,
            indices: HashMap::new(),
            bootstrap_methods: vec![],
            bootstrap_indices: HashMap::new(),
        }
    }

    /// Value of `constant_pool_count` in the class file (one more than the largest index)
    pub fn count(&self) -> u16 {
        self.next_offset
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.constants
    }

    pub fn bootstrap_methods(&self) -> &[(ConstantIndex, Vec<ConstantIndex>)] {
        &self.bootstrap_methods
    }

    /// Get or insert a constant, provided there is space for it
    ///
    /// The largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, entry: PoolEntry) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(index) = self.indices.get(&entry) {
            return Ok(*index);
        }
        let offset = self.next_offset;
        let next_offset = offset
            .checked_add(entry.width())
            .ok_or(ConstantPoolOverflow { offset })?;
        let index = ConstantIndex(offset);
        self.next_offset = next_offset;
        self.indices.insert(entry.clone(), index);
        self.constants.push(entry);
        Ok(index)
    }

    pub fn utf8(&mut self, string: impl AsRef<str>) -> Result<ConstantIndex, ConstantPoolOverflow> {
        self.push(PoolEntry::Utf8(string.as_ref().to_owned()))
    }

    /// `CONSTANT_Class_info` for a plain class
    pub fn class(&mut self, name: &BinaryName) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name = self.utf8(name.as_str())?;
        self.push(PoolEntry::Class(name))
    }

    /// `CONSTANT_Class_info` for a reference type, which is usually a class but can be an array
    /// (eg. for a `checkcast` to an array type)
    pub fn ref_type(
        &mut self,
        ref_type: &RefType<BinaryName>,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name = self.utf8(ref_type.render_class_constant())?;
        self.push(PoolEntry::Class(name))
    }

    pub fn string(&mut self, string: &str) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.utf8(string)?;
        self.push(PoolEntry::String(utf8))
    }

    pub fn name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.push(PoolEntry::NameAndType { name, descriptor })
    }

    pub fn field_ref(
        &mut self,
        owner: &BinaryName,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.push(PoolEntry::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn method_ref(
        &mut self,
        owner: &RefType<BinaryName>,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.ref_type(owner)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.push(PoolEntry::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }

    pub fn method_handle(&mut self, handle: &Handle) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let descriptor = handle.descriptor.render();
        let member = match &handle.descriptor {
            MemberDescriptor::Field(_) => {
                self.field_ref(&handle.owner, handle.name.as_str(), &descriptor)?
            }
            MemberDescriptor::Method(_) => self.method_ref(
                &RefType::Object(handle.owner.clone()),
                handle.name.as_str(),
                &descriptor,
                handle.is_interface,
            )?,
        };
        self.push(PoolEntry::MethodHandle {
            kind: handle.kind as u8,
            member,
        })
    }

    /// Constant that can be loaded with `ldc` or used as a bootstrap argument
    pub fn loadable(&mut self, constant: &Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match constant {
            Constant::Integer(integer) => self.push(PoolEntry::Integer(*integer)),
            Constant::Float(float) => self.push(PoolEntry::Float(float.to_bits())),
            Constant::Long(long) => self.push(PoolEntry::Long(*long)),
            Constant::Double(double) => self.push(PoolEntry::Double(double.to_bits())),
            Constant::String(string) => self.string(string),
            Constant::Class(ref_type) => self.ref_type(ref_type),
            Constant::MethodType(descriptor) => {
                let descriptor = self.utf8(descriptor.render())?;
                self.push(PoolEntry::MethodType(descriptor))
            }
            Constant::MethodHandle(handle) => self.method_handle(handle),
        }
    }

    /// Register a bootstrap method and get its position in the `BootstrapMethods` attribute
    pub fn bootstrap_method(
        &mut self,
        handle: &Handle,
        arguments: &[Constant],
    ) -> Result<u16, ConstantPoolOverflow> {
        let handle = self.method_handle(handle)?;
        let arguments = arguments
            .iter()
            .map(|argument| self.loadable(argument))
            .collect::<Result<Vec<_>, _>>()?;
        let key = (handle, arguments);
        if let Some(index) = self.bootstrap_indices.get(&key) {
            return Ok(*index);
        }
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_indices.insert(key.clone(), index);
        self.bootstrap_methods.push(key);
        Ok(index)
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.push(PoolEntry::InvokeDynamic {
            bootstrap_method,
            name_and_type,
        })
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for constant in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter().map(|unit| *unit as u32) {
            match unit {
                0x0001..=0x007F => buffer.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    buffer.push((unit >> 6 & 0x1F) as u8 | 0b1100_0000);
                    buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
                }
                _ => {
                    buffer.push((unit >> 12 & 0x0F) as u8 | 0b1110_0000);
                    buffer.push((unit >> 6 & 0x3F) as u8 | 0b1000_0000);
                    buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
                }
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Unpaired surrogates (which Java strings may legally contain) are replaced with `U+FFFD`.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let continuation = |offset: usize| -> Result<u16, String> {
            match bytes.get(i + offset) {
                Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((*b & 0x3F) as u16),
                _ => Err(format!("truncated modified UTF-8 sequence at byte {}", i)),
            }
        };
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(format!("raw null byte at byte {}", i));
            }
            units.push(b0);
            i += 1;
        } else if b0 & 0b1110_0000 == 0b1100_0000 {
            units.push((b0 & 0x1F) << 6 | continuation(1)?);
            i += 2;
        } else if b0 & 0b1111_0000 == 0b1110_0000 {
            units.push((b0 & 0x0F) << 12 | continuation(1)? << 6 | continuation(2)?);
            i += 3;
        } else {
            return Err(format!("invalid modified UTF-8 lead byte at byte {}", i));
        }
    }
    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}
