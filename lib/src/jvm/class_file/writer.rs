use crate::errors::{Error, Result};
use crate::jvm::class_file::{
    Attribute, ClassFile, ConstantIndex, ConstantPoolOverflow, ConstantsPool, MemberInfo,
    Serialize, StackMapFrame, VerificationTypeInfo,
};
use crate::jvm::code::opcode::*;
use crate::jvm::code::{Code, Constant, Frame, Insn, InsnId, SynLabel, VerificationType};
use crate::jvm::model::{Annotation, ClassEntity, ElementValue, FieldEntity, MethodEntity};
use crate::jvm::{BinaryName, Name, RenderDescriptor};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;

/// Serialize a class back into class file bytes
///
/// `max_stack`, `max_locals`, and the stack map frames are written as stored in each method body,
/// so run the verifier first. Frames are only written for class file versions 50 and up.
pub fn write_class(class: &ClassEntity) -> Result<Vec<u8>> {
    let class_file = ClassWriter {
        class,
        pool: ConstantsPool::new(),
    }
    .lower()?;
    let mut bytes = vec![];
    class_file.serialize(&mut bytes)?;
    Ok(bytes)
}

trait OrOverflow<T> {
    fn or_overflow(self, class: &BinaryName) -> Result<T>;
}

impl<T> OrOverflow<T> for std::result::Result<T, ConstantPoolOverflow> {
    fn or_overflow(self, class: &BinaryName) -> Result<T> {
        self.map_err(|_| Error::ConstantPoolOverflow(class.to_string()))
    }
}

struct ClassWriter<'c> {
    class: &'c ClassEntity,
    pool: ConstantsPool,
}

impl<'c> ClassWriter<'c> {
    fn utf8(&mut self, string: &str) -> Result<ConstantIndex> {
        self.pool.utf8(string).or_overflow(&self.class.name)
    }

    fn class_index(&mut self, name: &BinaryName) -> Result<ConstantIndex> {
        self.pool.class(name).or_overflow(&self.class.name)
    }

    fn attribute(&mut self, name: &str, info: Vec<u8>) -> Result<Attribute> {
        Ok(Attribute {
            name_index: self.utf8(name)?,
            info,
        })
    }

    fn lower(mut self) -> Result<ClassFile> {
        let class = self.class;
        let this_class = self.class_index(&class.name)?;
        let super_class = match &class.superclass {
            Some(superclass) => Some(self.class_index(superclass)?),
            None => None,
        };
        let interfaces = class
            .interfaces
            .iter()
            .map(|interface| self.class_index(interface))
            .collect::<Result<Vec<_>>>()?;
        let fields = class
            .fields
            .iter()
            .map(|field| self.field(field))
            .collect::<Result<Vec<_>>>()?;
        let methods = class
            .methods
            .iter()
            .map(|method| self.method(method))
            .collect::<Result<Vec<_>>>()?;

        let mut attributes = vec![];
        if let Some(source_file) = &class.source_file {
            let index = self.utf8(source_file)?;
            attributes.push(self.attribute("SourceFile", u16_bytes(index.0))?);
        }
        if let Some(signature) = &class.signature {
            let index = self.utf8(signature)?;
            attributes.push(self.attribute("Signature", u16_bytes(index.0))?);
        }
        if !class.inner_classes.is_empty() {
            let mut info = vec![];
            info.write_u16::<BigEndian>(class.inner_classes.len() as u16)?;
            for entry in &class.inner_classes {
                let inner = self.class_index(&entry.inner_class)?;
                let outer = match &entry.outer_class {
                    Some(outer) => self.class_index(outer)?,
                    None => ConstantIndex(0),
                };
                let name = match &entry.inner_name {
                    Some(name) => self.utf8(name.as_str())?,
                    None => ConstantIndex(0),
                };
                inner.serialize(&mut info)?;
                outer.serialize(&mut info)?;
                name.serialize(&mut info)?;
                entry.access_flags.serialize(&mut info)?;
            }
            attributes.push(self.attribute("InnerClasses", info)?);
        }
        if let Some(enclosing) = &class.enclosing_method {
            let mut info = vec![];
            self.class_index(&enclosing.class)?.serialize(&mut info)?;
            let method = match &enclosing.method {
                Some((name, descriptor)) => self
                    .pool
                    .name_and_type(name.as_str(), &descriptor.render())
                    .or_overflow(&class.name)?,
                None => ConstantIndex(0),
            };
            method.serialize(&mut info)?;
            attributes.push(self.attribute("EnclosingMethod", info)?);
        }
        if let Some(host) = &class.nest_host {
            let index = self.class_index(host)?;
            attributes.push(self.attribute("NestHost", u16_bytes(index.0))?);
        }
        if !class.nest_members.is_empty() {
            let mut info = vec![];
            info.write_u16::<BigEndian>(class.nest_members.len() as u16)?;
            for member in &class.nest_members {
                self.class_index(member)?.serialize(&mut info)?;
            }
            attributes.push(self.attribute("NestMembers", info)?);
        }
        self.annotation_attributes(
            &class.visible_annotations,
            &class.invisible_annotations,
            &mut attributes,
        )?;

        // Last, since encoding the methods is what fills in the bootstrap methods
        if !self.pool.bootstrap_methods().is_empty() {
            let mut info = vec![];
            let bootstrap_methods = self.pool.bootstrap_methods();
            info.write_u16::<BigEndian>(bootstrap_methods.len() as u16)?;
            for (handle, arguments) in bootstrap_methods {
                handle.serialize(&mut info)?;
                arguments.serialize(&mut info)?;
            }
            attributes.push(self.attribute("BootstrapMethods", info)?);
        }

        Ok(ClassFile {
            version: class.version,
            constants: self.pool,
            access_flags: class.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn field(&mut self, field: &FieldEntity) -> Result<MemberInfo> {
        let name_index = self.utf8(field.name.as_str())?;
        let descriptor_index = self.utf8(&field.descriptor.render())?;
        let mut attributes = vec![];
        if let Some(constant) = &field.constant_value {
            let index = self.pool.loadable(constant).or_overflow(&self.class.name)?;
            attributes.push(self.attribute("ConstantValue", u16_bytes(index.0))?);
        }
        if let Some(signature) = &field.signature {
            let index = self.utf8(signature)?;
            attributes.push(self.attribute("Signature", u16_bytes(index.0))?);
        }
        self.annotation_attributes(
            &field.visible_annotations,
            &field.invisible_annotations,
            &mut attributes,
        )?;
        Ok(MemberInfo {
            access_flags: field.access_flags.bits(),
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn method(&mut self, method: &MethodEntity) -> Result<MemberInfo> {
        let name_index = self.utf8(method.name.as_str())?;
        let descriptor_index = self.utf8(&method.descriptor.render())?;
        let mut attributes = vec![];
        if let Some(code) = &method.code {
            let info = self.code(method, code)?;
            attributes.push(self.attribute("Code", info)?);
        }
        if !method.exceptions.is_empty() {
            let mut info = vec![];
            info.write_u16::<BigEndian>(method.exceptions.len() as u16)?;
            for exception in &method.exceptions {
                self.class_index(exception)?.serialize(&mut info)?;
            }
            attributes.push(self.attribute("Exceptions", info)?);
        }
        if let Some(signature) = &method.signature {
            let index = self.utf8(signature)?;
            attributes.push(self.attribute("Signature", u16_bytes(index.0))?);
        }
        if let Some(default) = &method.annotation_default {
            let mut info = vec![];
            self.element_value(default, &mut info)?;
            attributes.push(self.attribute("AnnotationDefault", info)?);
        }
        self.annotation_attributes(
            &method.visible_annotations,
            &method.invisible_annotations,
            &mut attributes,
        )?;
        Ok(MemberInfo {
            access_flags: method.access_flags.bits(),
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn annotation_attributes(
        &mut self,
        visible: &[Annotation],
        invisible: &[Annotation],
        attributes: &mut Vec<Attribute>,
    ) -> Result<()> {
        for (name, annotations) in [
            ("RuntimeVisibleAnnotations", visible),
            ("RuntimeInvisibleAnnotations", invisible),
        ] {
            if annotations.is_empty() {
                continue;
            }
            let mut info = vec![];
            info.write_u16::<BigEndian>(annotations.len() as u16)?;
            for annotation in annotations {
                self.annotation(annotation, &mut info)?;
            }
            attributes.push(self.attribute(name, info)?);
        }
        Ok(())
    }

    fn annotation(&mut self, annotation: &Annotation, out: &mut Vec<u8>) -> Result<()> {
        self.utf8(&annotation.type_descriptor.render())?
            .serialize(out)?;
        out.write_u16::<BigEndian>(annotation.elements.len() as u16)?;
        for (name, value) in &annotation.elements {
            self.utf8(name)?.serialize(out)?;
            self.element_value(value, out)?;
        }
        Ok(())
    }

    fn element_value(&mut self, value: &ElementValue, out: &mut Vec<u8>) -> Result<()> {
        match value {
            ElementValue::Const { tag, value } => {
                out.write_u8(*tag)?;
                let index = match value {
                    Constant::String(string) if *tag == b's' => self.utf8(string)?,
                    other => self.pool.loadable(other).or_overflow(&self.class.name)?,
                };
                index.serialize(out)?;
            }
            ElementValue::Enum {
                type_descriptor,
                const_name,
            } => {
                out.write_u8(b'e')?;
                self.utf8(&type_descriptor.render())?.serialize(out)?;
                self.utf8(const_name)?.serialize(out)?;
            }
            ElementValue::Class(class) => {
                out.write_u8(b'c')?;
                let descriptor = match class {
                    Some(class) => class.render(),
                    None => String::from("V"),
                };
                self.utf8(&descriptor)?.serialize(out)?;
            }
            ElementValue::Annotation(annotation) => {
                out.write_u8(b'@')?;
                self.annotation(annotation, out)?;
            }
            ElementValue::Array(values) => {
                out.write_u8(b'[')?;
                out.write_u16::<BigEndian>(values.len() as u16)?;
                for value in values {
                    self.element_value(value, out)?;
                }
            }
        }
        Ok(())
    }

    /// Body of the `Code` attribute
    ///
    /// The instruction stream is encoded twice: the first pass places labels (jump operands are
    /// written as placeholders), the second pass writes the real offsets. Both passes produce
    /// identical sizes, since instruction sizes never depend on branch distances.
    fn code(&mut self, method: &MethodEntity, code: &Code) -> Result<Vec<u8>> {
        let class = self.class;
        let describe = || format!("{}.{}{}", class.name, method.name, method.descriptor.render());

        let mut labels: HashMap<SynLabel, u32> = HashMap::new();
        let mut offsets: HashMap<InsnId, u32> = HashMap::new();
        let mut sizing = vec![];
        for (id, insn) in code.instructions.iter() {
            let offset = sizing.len() as u32;
            if let Insn::Label(label) = insn {
                labels.insert(*label, offset);
            }
            offsets.insert(id, offset);
            self.instruction(insn, offset, None, &mut sizing)?;
        }
        if sizing.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(describe()));
        }

        let mut bytecode = Vec::with_capacity(sizing.len());
        let mut line_numbers = vec![];
        for insn in code.instructions.insns() {
            let offset = bytecode.len() as u32;
            if let Insn::LineNumber { line, start } = insn {
                let start = label_offset(&labels, start, &describe)?;
                line_numbers.push((start as u16, *line));
            }
            self.instruction(insn, offset, Some(&labels), &mut bytecode)
                .map_err(|err| match err {
                    Error::BranchOffsetOverflow(_) => Error::BranchOffsetOverflow(describe()),
                    other => other,
                })?;
        }

        let mut info = vec![];
        code.max_stack.serialize(&mut info)?;
        code.max_locals.serialize(&mut info)?;
        (bytecode.len() as u32).serialize(&mut info)?;
        info.extend_from_slice(&bytecode);

        // Ranges emptied by dead code removal are dropped
        let mut handlers = vec![];
        for block in &code.try_catch_blocks {
            let start = label_offset(&labels, &block.start, &describe)?;
            let end = label_offset(&labels, &block.end, &describe)?;
            if start < end {
                handlers.push((block, start, end));
            }
        }
        (handlers.len() as u16).serialize(&mut info)?;
        for (block, start, end) in handlers {
            let handler = label_offset(&labels, &block.handler, &describe)?;
            let catch_type = match &block.catch_type {
                Some(catch_type) => self.class_index(catch_type)?,
                None => ConstantIndex(0),
            };
            (start as u16).serialize(&mut info)?;
            (end as u16).serialize(&mut info)?;
            (handler as u16).serialize(&mut info)?;
            catch_type.serialize(&mut info)?;
        }

        let mut attributes = vec![];
        if !line_numbers.is_empty() {
            let mut table = vec![];
            (line_numbers.len() as u16).serialize(&mut table)?;
            for (start, line) in line_numbers {
                start.serialize(&mut table)?;
                line.serialize(&mut table)?;
            }
            attributes.push(self.attribute("LineNumberTable", table)?);
        }
        if !code.local_variables.is_empty() {
            let mut table = vec![];
            (code.local_variables.len() as u16).serialize(&mut table)?;
            for local in &code.local_variables {
                let start = label_offset(&labels, &local.start, &describe)?;
                let end = label_offset(&labels, &local.end, &describe)?;
                let name = self.utf8(&local.name)?;
                let descriptor = self.utf8(&local.descriptor.render())?;
                (start as u16).serialize(&mut table)?;
                (end.saturating_sub(start) as u16).serialize(&mut table)?;
                name.serialize(&mut table)?;
                descriptor.serialize(&mut table)?;
                local.index.serialize(&mut table)?;
            }
            attributes.push(self.attribute("LocalVariableTable", table)?);
        }
        match &code.frames {
            Some(frames) if class.version.major_version >= 50 && !frames.is_empty() => {
                let table = self.stack_map_table(method, frames, &offsets, &describe)?;
                attributes.push(self.attribute("StackMapTable", table)?);
            }
            _ => (),
        }
        attributes.serialize(&mut info)?;
        Ok(info)
    }

    /// Body of the `StackMapTable` attribute, each frame encoded relative to the previous one
    fn stack_map_table(
        &mut self,
        method: &MethodEntity,
        frames: &[Frame],
        offsets: &HashMap<InsnId, u32>,
        describe: &impl Fn() -> String,
    ) -> Result<Vec<u8>> {
        let offset_of = |id: &InsnId| {
            offsets.get(id).copied().ok_or_else(|| {
                Error::malformed(describe(), "stack map frame for a removed instruction")
            })
        };
        let initial = Frame::initial_locals(&self.class.name, method);
        let mut previous_locals = self.verification_types(&initial, &offset_of)?;
        let mut previous_offset: Option<u32> = None;

        let mut table = vec![];
        (frames.len() as u16).serialize(&mut table)?;
        for frame in frames {
            let offset = offset_of(&frame.at)?;
            let offset_delta = match previous_offset {
                None => offset,
                Some(previous) if offset > previous => offset - previous - 1,
                Some(_) => {
                    let message = "stack map frames are out of order";
                    return Err(Error::malformed(describe(), message));
                }
            };
            let locals = self.verification_types(&frame.locals, &offset_of)?;
            let stack = self.verification_types(&frame.stack, &offset_of)?;
            StackMapFrame::between(offset_delta as u16, &previous_locals, &locals, &stack)
                .serialize(&mut table)?;
            previous_locals = locals;
            previous_offset = Some(offset);
        }
        Ok(table)
    }

    fn verification_types(
        &mut self,
        types: &[VerificationType],
        offset_of: &impl Fn(&InsnId) -> Result<u32>,
    ) -> Result<Vec<VerificationTypeInfo>> {
        types
            .iter()
            .map(|vtype| {
                Ok(match vtype {
                    VerificationType::Top => VerificationTypeInfo::Top,
                    VerificationType::Integer => VerificationTypeInfo::Integer,
                    VerificationType::Float => VerificationTypeInfo::Float,
                    VerificationType::Long => VerificationTypeInfo::Long,
                    VerificationType::Double => VerificationTypeInfo::Double,
                    VerificationType::Null => VerificationTypeInfo::Null,
                    VerificationType::UninitializedThis => VerificationTypeInfo::UninitializedThis,
                    VerificationType::Object(ref_type) => VerificationTypeInfo::Object(
                        self.pool.ref_type(ref_type).or_overflow(&self.class.name)?,
                    ),
                    VerificationType::Uninitialized(new) => {
                        VerificationTypeInfo::Uninitialized(offset_of(new)? as u16)
                    }
                })
            })
            .collect()
    }

    /// Encode one instruction at `offset`
    ///
    /// Without `labels`, branch offsets are written as zeros.
    fn instruction(
        &mut self,
        insn: &Insn,
        offset: u32,
        labels: Option<&HashMap<SynLabel, u32>>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let class: &'c ClassEntity = self.class;
        let class_name = &class.name;
        let branch = |target: &SynLabel| -> Result<i32> {
            match labels {
                None => Ok(0),
                Some(labels) => labels
                    .get(target)
                    .map(|target| *target as i64 - offset as i64)
                    .map(|delta| delta as i32)
                    .ok_or_else(|| {
                        Error::malformed(class_name.as_str(), format!("jump to unplaced label {:?}", target))
                    }),
            }
        };
        let padding = |out: &mut Vec<u8>| {
            while out.len() % 4 != 0 {
                out.push(0);
            }
        };

        match insn {
            Insn::Label(_) | Insn::LineNumber { .. } => (),
            Insn::Simple(opcode) => out.push(*opcode),
            Insn::Int { opcode, operand } => {
                out.push(*opcode);
                if *opcode == SIPUSH {
                    out.write_i16::<BigEndian>(*operand as i16)?;
                } else {
                    out.push(*operand as u8);
                }
            }
            Insn::Var { opcode, index } => {
                let compact_base = match *opcode {
                    ILOAD..=ALOAD => Some(ILOAD_0 + (opcode - ILOAD) * 4),
                    ISTORE..=ASTORE => Some(ISTORE_0 + (opcode - ISTORE) * 4),
                    _ => None,
                };
                match (compact_base, *index) {
                    (Some(base), index @ 0..=3) => out.push(base + index as u8),
                    (_, index @ 0..=255) => {
                        out.push(*opcode);
                        out.push(index as u8);
                    }
                    (_, index) => {
                        out.push(WIDE);
                        out.push(*opcode);
                        out.write_u16::<BigEndian>(index)?;
                    }
                }
            }
            Insn::Type { opcode, class } => {
                out.push(*opcode);
                self.pool
                    .ref_type(class)
                    .or_overflow(class_name)?
                    .serialize(out)?;
            }
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => {
                out.push(*opcode);
                self.pool
                    .field_ref(owner, name.as_str(), &descriptor.render())
                    .or_overflow(class_name)?
                    .serialize(out)?;
            }
            Insn::Method {
                opcode,
                owner,
                name,
                descriptor,
                is_interface,
            } => {
                out.push(*opcode);
                self.pool
                    .method_ref(owner, name.as_str(), &descriptor.render(), *is_interface)
                    .or_overflow(class_name)?
                    .serialize(out)?;
                if *opcode == INVOKEINTERFACE {
                    out.push(descriptor.parameter_length(true) as u8);
                    out.push(0);
                }
            }
            Insn::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
            } => {
                let bootstrap_index = self
                    .pool
                    .bootstrap_method(&bootstrap.handle, &bootstrap.arguments)
                    .or_overflow(class_name)?;
                let index = self
                    .pool
                    .invoke_dynamic(bootstrap_index, name.as_str(), &descriptor.render())
                    .or_overflow(class_name)?;
                out.push(INVOKEDYNAMIC);
                index.serialize(out)?;
                out.write_u16::<BigEndian>(0)?;
            }
            Insn::Jump { opcode, target } => {
                let delta = branch(target)?;
                let delta = i16::try_from(delta)
                    .map_err(|_| Error::BranchOffsetOverflow(class_name.to_string()))?;
                out.push(*opcode);
                out.write_i16::<BigEndian>(delta)?;
            }
            Insn::Ldc(constant) => {
                let index = self.pool.loadable(constant).or_overflow(class_name)?;
                if constant.is_wide() {
                    out.push(LDC2_W);
                    index.serialize(out)?;
                } else if index.0 <= u8::MAX as u16 {
                    out.push(LDC);
                    out.push(index.0 as u8);
                } else {
                    out.push(LDC_W);
                    index.serialize(out)?;
                }
            }
            Insn::Iinc { index, increment } => {
                if let (Ok(index), Ok(increment)) =
                    (u8::try_from(*index), i8::try_from(*increment))
                {
                    out.push(IINC);
                    out.push(index);
                    out.push(increment as u8);
                } else {
                    out.push(WIDE);
                    out.push(IINC);
                    out.write_u16::<BigEndian>(*index)?;
                    out.write_i16::<BigEndian>(*increment)?;
                }
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                if insn.is_malformed_switch() {
                    let message =
                        format!("tableswitch {}..={} has {} targets", low, high, targets.len());
                    return Err(Error::malformed(class_name.as_str(), message));
                }
                out.push(TABLESWITCH);
                padding(out);
                out.write_i32::<BigEndian>(branch(default)?)?;
                out.write_i32::<BigEndian>(*low)?;
                out.write_i32::<BigEndian>(*high)?;
                for target in targets {
                    out.write_i32::<BigEndian>(branch(target)?)?;
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                out.push(LOOKUPSWITCH);
                padding(out);
                out.write_i32::<BigEndian>(branch(default)?)?;
                out.write_i32::<BigEndian>(pairs.len() as i32)?;
                let mut sorted: Vec<&(i32, SynLabel)> = pairs.iter().collect();
                sorted.sort_by_key(|(key, _)| *key);
                for (key, target) in sorted {
                    out.write_i32::<BigEndian>(*key)?;
                    out.write_i32::<BigEndian>(branch(target)?)?;
                }
            }
            Insn::MultiANewArray { class, dimensions } => {
                out.push(MULTIANEWARRAY);
                self.pool
                    .ref_type(class)
                    .or_overflow(class_name)?
                    .serialize(out)?;
                out.push(*dimensions);
            }
        }
        Ok(())
    }
}

fn label_offset(
    labels: &HashMap<SynLabel, u32>,
    label: &SynLabel,
    describe: &impl Fn() -> String,
) -> Result<u32> {
    labels.get(label).copied().ok_or_else(|| {
        Error::malformed(describe(), format!("reference to unplaced label {:?}", label))
    })
}

fn u16_bytes(value: u16) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}
