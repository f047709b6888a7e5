use crate::jvm::code::opcode::*;
use crate::jvm::code::{
    BootstrapMethod, Constant, Insn, LabelGenerator, SynLabel, SynLabelGenerator,
};
use crate::jvm::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};

/// Fluent emission of instruction sequences
///
/// Labels come from the generator of the method the sequence is destined for, so a builder can be
/// used to produce payloads for an [`EditBuffer`](crate::jvm::code::EditBuffer) while the method's
/// existing instructions are being walked.
pub struct InsnBuilder<'a> {
    labels: &'a SynLabelGenerator,
    insns: Vec<Insn>,
}

impl<'a> InsnBuilder<'a> {
    pub fn new(labels: &'a SynLabelGenerator) -> InsnBuilder<'a> {
        InsnBuilder {
            labels,
            insns: vec![],
        }
    }

    /// Instructions emitted so far
    pub fn build(self) -> Vec<Insn> {
        self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Push a raw instruction
    pub fn push(&mut self, insn: Insn) -> &mut Self {
        self.insns.push(insn);
        self
    }

    /// Push an instruction that has no operands
    pub fn simple(&mut self, opcode: u8) -> &mut Self {
        self.push(Insn::Simple(opcode))
    }

    /// Generate a label that is fresh within the destination method
    pub fn fresh_label(&self) -> SynLabel {
        self.labels.fresh_label()
    }

    /// Mark the current position with a label
    pub fn place_label(&mut self, label: SynLabel) -> &mut Self {
        self.push(Insn::Label(label))
    }

    pub fn jump(&mut self, opcode: u8, target: SynLabel) -> &mut Self {
        self.push(Insn::Jump { opcode, target })
    }

    pub fn goto(&mut self, target: SynLabel) -> &mut Self {
        self.jump(GOTO, target)
    }

    /// Push an integer constant onto the stack
    pub fn const_int(&mut self, integer: i32) -> &mut Self {
        let insn = match integer {
            -1..=5 => Insn::Simple((ICONST_0 as i32 + integer) as u8),
            -128..=127 => Insn::Int {
                opcode: BIPUSH,
                operand: integer,
            },
            -32768..=32767 => Insn::Int {
                opcode: SIPUSH,
                operand: integer,
            },
            _ => Insn::Ldc(Constant::Integer(integer)),
        };
        self.push(insn)
    }

    /// Push a long constant onto the stack
    ///
    /// Small values fall back to an `int` instruction followed by a conversion: `iconst_2 i2l` is
    /// two bytes in the method body and takes no constant pool slots, while `ldc2_w 2` takes three
    /// bytes and two slots.
    pub fn const_long(&mut self, long: i64) -> &mut Self {
        match long {
            0 => self.simple(LCONST_0),
            1 => self.simple(LCONST_1),
            -32768..=32767 => self.const_int(long as i32).simple(I2L),
            _ => self.push(Insn::Ldc(Constant::Long(long))),
        }
    }

    /// Push a float constant onto the stack
    pub fn const_float(&mut self, float: f32) -> &mut Self {
        match float {
            f if f == 0.0 && f.is_sign_positive() => self.simple(FCONST_0),
            f if f == 1.0 => self.simple(FCONST_1),
            f if f == 2.0 => self.simple(FCONST_2),
            f if f == -1.0 || f == 3.0 || f == 4.0 || f == 5.0 => {
                self.const_int(f as i32).simple(I2F)
            }
            _ => self.push(Insn::Ldc(Constant::Float(float))),
        }
    }

    /// Push a double constant onto the stack
    pub fn const_double(&mut self, double: f64) -> &mut Self {
        match double {
            f if f == 0.0 && f.is_sign_positive() => self.simple(DCONST_0),
            f if f == 1.0 => self.simple(DCONST_1),
            f if f == -1.0 || f == 2.0 || f == 3.0 || f == 4.0 || f == 5.0 => {
                self.const_int(f as i32).simple(I2D)
            }
            _ => self.push(Insn::Ldc(Constant::Double(double))),
        }
    }

    /// Push a constant string to the stack
    pub fn const_string(&mut self, string: impl Into<String>) -> &mut Self {
        self.push(Insn::Ldc(Constant::String(string.into())))
    }

    /// Get a local at a particular offset
    pub fn get_local(&mut self, index: u16, field_type: &FieldType<BinaryName>) -> &mut Self {
        let opcode = match field_type {
            FieldType::Base(
                BaseType::Int
                | BaseType::Char
                | BaseType::Short
                | BaseType::Byte
                | BaseType::Boolean,
            ) => ILOAD,
            FieldType::Base(BaseType::Float) => FLOAD,
            FieldType::Base(BaseType::Long) => LLOAD,
            FieldType::Base(BaseType::Double) => DLOAD,
            FieldType::Ref(_) => ALOAD,
        };
        self.push(Insn::Var { opcode, index })
    }

    /// Set a local at a particular offset
    pub fn set_local(&mut self, index: u16, field_type: &FieldType<BinaryName>) -> &mut Self {
        let opcode = match field_type {
            FieldType::Base(
                BaseType::Int
                | BaseType::Char
                | BaseType::Short
                | BaseType::Byte
                | BaseType::Boolean,
            ) => ISTORE,
            FieldType::Base(BaseType::Float) => FSTORE,
            FieldType::Base(BaseType::Long) => LSTORE,
            FieldType::Base(BaseType::Double) => DSTORE,
            FieldType::Ref(_) => ASTORE,
        };
        self.push(Insn::Var { opcode, index })
    }

    /// Return from the method
    pub fn return_(&mut self, field_type_opt: Option<&FieldType<BinaryName>>) -> &mut Self {
        let opcode = match field_type_opt {
            None => RETURN,
            Some(FieldType::Base(
                BaseType::Int
                | BaseType::Char
                | BaseType::Short
                | BaseType::Byte
                | BaseType::Boolean,
            )) => IRETURN,
            Some(FieldType::Base(BaseType::Float)) => FRETURN,
            Some(FieldType::Base(BaseType::Long)) => LRETURN,
            Some(FieldType::Base(BaseType::Double)) => DRETURN,
            Some(FieldType::Ref(_)) => ARETURN,
        };
        self.simple(opcode)
    }

    /// Load an element out of an array whose elements have the given type
    pub fn array_load(&mut self, element_type: &FieldType<BinaryName>) -> &mut Self {
        let opcode = match element_type {
            FieldType::Base(BaseType::Int) => IALOAD,
            FieldType::Base(BaseType::Long) => LALOAD,
            FieldType::Base(BaseType::Float) => FALOAD,
            FieldType::Base(BaseType::Double) => DALOAD,
            FieldType::Base(BaseType::Byte | BaseType::Boolean) => BALOAD,
            FieldType::Base(BaseType::Char) => CALOAD,
            FieldType::Base(BaseType::Short) => SALOAD,
            FieldType::Ref(_) => AALOAD,
        };
        self.simple(opcode)
    }

    /// Store an element into an array whose elements have the given type
    pub fn array_store(&mut self, element_type: &FieldType<BinaryName>) -> &mut Self {
        let opcode = match element_type {
            FieldType::Base(BaseType::Int) => IASTORE,
            FieldType::Base(BaseType::Long) => LASTORE,
            FieldType::Base(BaseType::Float) => FASTORE,
            FieldType::Base(BaseType::Double) => DASTORE,
            FieldType::Base(BaseType::Byte | BaseType::Boolean) => BASTORE,
            FieldType::Base(BaseType::Char) => CASTORE,
            FieldType::Base(BaseType::Short) => SASTORE,
            FieldType::Ref(_) => AASTORE,
        };
        self.simple(opcode)
    }

    pub fn iinc(&mut self, index: u16, increment: i16) -> &mut Self {
        self.push(Insn::Iinc { index, increment })
    }

    /// Construct a new (uninitialized) object of the given type
    pub fn new_object(&mut self, class: BinaryName) -> &mut Self {
        self.push(Insn::Type {
            opcode: NEW,
            class: RefType::Object(class),
        })
    }

    pub fn type_insn(&mut self, opcode: u8, class: RefType<BinaryName>) -> &mut Self {
        self.push(Insn::Type { opcode, class })
    }

    /// Get/put a field
    pub fn access_field(
        &mut self,
        opcode: u8,
        owner: BinaryName,
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    ) -> &mut Self {
        self.push(Insn::Field {
            opcode,
            owner,
            name,
            descriptor,
        })
    }

    /// Invoke a method on a class
    pub fn invoke(
        &mut self,
        opcode: u8,
        owner: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> &mut Self {
        self.push(Insn::Method {
            opcode,
            owner: RefType::Object(owner),
            name,
            descriptor,
            is_interface: opcode == INVOKEINTERFACE,
        })
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap: BootstrapMethod,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> &mut Self {
        self.push(Insn::InvokeDynamic {
            name,
            descriptor,
            bootstrap,
        })
    }

    /// Emit a `tableswitch` over the contiguous range `low..=high`
    ///
    /// One label per case and one default label are generated. After the switch, each case label
    /// is placed in index order and `cases` is called with the case value, then the default label
    /// is placed and `default_case` is called. Callbacks are responsible for not falling through
    /// into the next case.
    ///
    /// The range must not be empty (`low <= high`); use [`InsnBuilder::lookup_switch`] when it
    /// might be.
    pub fn table_switch(
        &mut self,
        low: i32,
        high: i32,
        default_case: impl FnOnce(&mut Self),
        mut cases: impl FnMut(&mut Self, i32),
    ) -> &mut Self {
        debug_assert!(low <= high, "tableswitch range {}..={} is empty", low, high);
        let default = self.fresh_label();
        let targets: Vec<SynLabel> = (low..=high).map(|_| self.fresh_label()).collect();

        self.push(Insn::TableSwitch {
            low,
            high,
            default,
            targets: targets.clone(),
        });
        for (value, label) in (low..=high).zip(targets) {
            self.place_label(label);
            cases(self, value);
        }
        self.place_label(default);
        default_case(self);
        self
    }

    /// Emit a `lookupswitch` over the given keys (sorted as the JVM requires)
    ///
    /// Works like [`InsnBuilder::table_switch`], with `cases` called for each key in ascending order.
    pub fn lookup_switch(
        &mut self,
        keys: &[i32],
        default_case: impl FnOnce(&mut Self),
        mut cases: impl FnMut(&mut Self, i32),
    ) -> &mut Self {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let default = self.fresh_label();
        let pairs: Vec<(i32, SynLabel)> =
            keys.iter().map(|key| (*key, self.fresh_label())).collect();

        self.push(Insn::LookupSwitch {
            default,
            pairs: pairs.clone(),
        });
        for (key, label) in pairs {
            self.place_label(label);
            cases(self, key);
        }
        self.place_label(default);
        default_case(self);
        self
    }
}
