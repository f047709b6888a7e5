use crate::jvm::code::opcode::*;
use crate::jvm::code::{Code, Constant, EditBuffer, Insn, InsnBuilder};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, UnqualifiedName};
use crate::transform::{TransformContext, Transformer};
use crate::Result;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumberEncryptionSettings {
    pub do_int: bool,
    pub do_long: bool,
    pub do_float: bool,
    pub do_double: bool,
}

impl Default for NumberEncryptionSettings {
    fn default() -> Self {
        NumberEncryptionSettings {
            do_int: true,
            do_long: true,
            do_float: true,
            do_double: true,
        }
    }
}

/// Numeric literal pushed by a single instruction
#[derive(Copy, Clone, PartialEq, Debug)]
enum Literal {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Literal {
    fn of(insn: &Insn) -> Option<Literal> {
        Some(match insn {
            Insn::Simple(opcode @ ICONST_M1..=ICONST_5) => {
                Literal::Int(*opcode as i32 - ICONST_0 as i32)
            }
            Insn::Simple(opcode @ (LCONST_0 | LCONST_1)) => {
                Literal::Long((*opcode - LCONST_0) as i64)
            }
            Insn::Simple(opcode @ FCONST_0..=FCONST_2) => {
                Literal::Float((*opcode - FCONST_0) as f32)
            }
            Insn::Simple(opcode @ (DCONST_0 | DCONST_1)) => {
                Literal::Double((*opcode - DCONST_0) as f64)
            }
            Insn::Int {
                opcode: BIPUSH | SIPUSH,
                operand,
            } => Literal::Int(*operand),
            Insn::Ldc(Constant::Integer(value)) => Literal::Int(*value),
            Insn::Ldc(Constant::Long(value)) => Literal::Long(*value),
            Insn::Ldc(Constant::Float(value)) => Literal::Float(*value),
            Insn::Ldc(Constant::Double(value)) => Literal::Double(*value),
            _ => return None,
        })
    }
}

/// How many literals of each kind were rewritten
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct EncryptionCounts {
    pub ints: usize,
    pub longs: usize,
    pub floats: usize,
    pub doubles: usize,
}

/// Replaces numeric literals with an `xor` of two random-looking values
///
/// `int` and `long` literals become `(value ^ key) ^ key`. Floating point literals are rebuilt
/// from their encrypted bit patterns with `Float.intBitsToFloat` and `Double.longBitsToDouble`.
pub struct NumberEncryption {
    settings: NumberEncryptionSettings,
}

impl NumberEncryption {
    pub const NAME: &'static str = "NumberEncryption";

    pub fn new(settings: NumberEncryptionSettings) -> NumberEncryption {
        NumberEncryption { settings }
    }

    fn enabled(&self, literal: Literal) -> bool {
        match literal {
            Literal::Int(_) => self.settings.do_int,
            Literal::Long(_) => self.settings.do_long,
            Literal::Float(_) => self.settings.do_float,
            Literal::Double(_) => self.settings.do_double,
        }
    }

    /// Rewrite the literals of one method body
    pub fn encrypt(&self, code: &mut Code, rng: &mut SmallRng) -> Result<EncryptionCounts> {
        let mut counts = EncryptionCounts::default();
        let mut edits = EditBuffer::new();
        for (id, insn) in code.instructions.iter() {
            let literal = match Literal::of(insn) {
                Some(literal) if self.enabled(literal) => literal,
                _ => continue,
            };
            let mut builder = InsnBuilder::new(&code.labels);
            match literal {
                Literal::Int(value) => {
                    xor_int(&mut builder, value, rng.random());
                    counts.ints += 1;
                }
                Literal::Long(value) => {
                    xor_long(&mut builder, value, rng.random());
                    counts.longs += 1;
                }
                Literal::Float(value) => {
                    xor_int(&mut builder, value.to_bits() as i32, rng.random());
                    builder.invoke(
                        INVOKESTATIC,
                        BinaryName::FLOAT,
                        UnqualifiedName::INTBITSTOFLOAT,
                        MethodDescriptor {
                            parameters: vec![FieldType::int()],
                            return_type: Some(FieldType::float()),
                        },
                    );
                    counts.floats += 1;
                }
                Literal::Double(value) => {
                    xor_long(&mut builder, value.to_bits() as i64, rng.random());
                    builder.invoke(
                        INVOKESTATIC,
                        BinaryName::DOUBLE,
                        UnqualifiedName::LONGBITSTODOUBLE,
                        MethodDescriptor {
                            parameters: vec![FieldType::long()],
                            return_type: Some(FieldType::double()),
                        },
                    );
                    counts.doubles += 1;
                }
            }
            edits.replace(id, builder.build());
        }
        edits.commit(&mut code.instructions)?;
        Ok(counts)
    }
}

fn xor_int(builder: &mut InsnBuilder<'_>, value: i32, key: i32) {
    builder
        .const_int(value ^ key)
        .const_int(key)
        .simple(IXOR);
}

fn xor_long(builder: &mut InsnBuilder<'_>, value: i64, key: i64) {
    builder
        .const_long(value ^ key)
        .const_long(key)
        .simple(LXOR);
}

impl Transformer for NumberEncryption {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, context: &mut TransformContext) -> Result<()> {
        let mut total = EncryptionCounts::default();
        let rng = &mut context.rng;
        for class in context.repository.program_classes_mut() {
            for method in &mut class.methods {
                if let Some(code) = &mut method.code {
                    let counts = self.encrypt(code, rng)?;
                    total.ints += counts.ints;
                    total.longs += counts.longs;
                    total.floats += counts.floats;
                    total.doubles += counts.doubles;
                }
            }
        }
        log::info!(
            "Encrypted {} ints, {} longs, {} floats, and {} doubles",
            total.ints,
            total.longs,
            total.floats,
            total.doubles
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::SynLabelGenerator;
    use rand::SeedableRng;

    /// Fold an instruction sequence produced by the encryption back into a value
    fn evaluate(insns: &[&Insn]) -> Literal {
        let mut stack: Vec<i64> = vec![];
        for insn in insns {
            match insn {
                Insn::Simple(IXOR) | Insn::Simple(LXOR) => {
                    let (b, a) = (stack.pop().unwrap(), stack.pop().unwrap());
                    stack.push(a ^ b);
                }
                Insn::Simple(I2L) => (),
                Insn::Method { name, .. } if *name == UnqualifiedName::INTBITSTOFLOAT => {
                    let bits = stack.pop().unwrap() as u32;
                    return Literal::Float(f32::from_bits(bits));
                }
                Insn::Method { name, .. } if *name == UnqualifiedName::LONGBITSTODOUBLE => {
                    let bits = stack.pop().unwrap() as u64;
                    return Literal::Double(f64::from_bits(bits));
                }
                other => match Literal::of(other).unwrap() {
                    Literal::Int(value) => stack.push(value as i64),
                    Literal::Long(value) => stack.push(value),
                    _ => panic!("unexpected {:?}", other),
                },
            }
        }
        match insns.last() {
            Some(Insn::Simple(IXOR)) => Literal::Int(stack[0] as i32),
            _ => Literal::Long(stack[0]),
        }
    }

    fn encrypt(literal: Insn, settings: NumberEncryptionSettings) -> (Code, EncryptionCounts) {
        let mut code = Code::new(vec![literal, Insn::Simple(POP)], SynLabelGenerator::default());
        let mut rng = SmallRng::seed_from_u64(11);
        let counts = NumberEncryption::new(settings)
            .encrypt(&mut code, &mut rng)
            .unwrap();
        (code, counts)
    }

    #[test]
    fn literals_keep_their_values() {
        let literals = vec![
            Insn::Simple(ICONST_M1),
            Insn::Int {
                opcode: SIPUSH,
                operand: -3000,
            },
            Insn::Ldc(Constant::Integer(i32::MIN)),
            Insn::Simple(LCONST_1),
            Insn::Ldc(Constant::Long(0x1234_5678_9abc_def0)),
            Insn::Simple(FCONST_2),
            Insn::Ldc(Constant::Float(-0.375)),
            Insn::Ldc(Constant::Double(std::f64::consts::PI)),
        ];
        for literal in literals {
            let expected = Literal::of(&literal).unwrap();
            let (code, counts) = encrypt(literal, NumberEncryptionSettings::default());
            let insns: Vec<&Insn> = code.instructions.insns().collect();
            let (last, body) = insns.split_last().unwrap();
            assert_eq!(**last, Insn::Simple(POP));
            assert!(body.len() >= 3, "{:?} was not rewritten", expected);
            assert_eq!(evaluate(body), expected);

            let total = counts.ints + counts.longs + counts.floats + counts.doubles;
            assert_eq!(total, 1);
        }
    }

    #[test]
    fn disabled_kinds_are_left_alone() {
        let settings = NumberEncryptionSettings {
            do_float: false,
            ..NumberEncryptionSettings::default()
        };
        let (code, counts) = encrypt(Insn::Simple(FCONST_1), settings);
        assert_eq!(counts, EncryptionCounts::default());
        assert_eq!(code.instructions.len(), 2);
    }
}
