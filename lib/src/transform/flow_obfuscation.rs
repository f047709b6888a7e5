use crate::jvm::code::opcode::*;
use crate::jvm::code::{Code, EditBuffer, Insn, InsnBuilder, SynLabel};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, UnqualifiedName};
use crate::transform::{TransformContext, Transformer};
use crate::Result;
use rand::rngs::SmallRng;
use rand::Rng;

/// Adds a `tableswitch` full of decoy branches after every conditional jump
///
/// When the condition is false, execution lands on a switch over a constant that picks the real
/// continuation. The other cases are decoys: each prints a random number, then "maybe" takes the
/// original jump (`iconst_0 ifeq`, which always does) or hops to another decoy.
///
/// ```text
///     ifeq L
///     iconst_2
///     tableswitch 0..3 { 0: T0, 1: T1, 2: next, 3: T3, default: T2 }
/// T0: getstatic System.out
///     ldc 1234567
///     invokevirtual println(I)V
///     iconst_0
///     ifeq L
///     goto T3
///     ...
/// next:
/// ```
#[derive(Default)]
pub struct FlowObfuscation;

impl FlowObfuscation {
    pub const NAME: &'static str = "FlowObfuscation";

    /// Rewrite one method body, returning how many conditional jumps got decoys
    pub fn obfuscate(code: &mut Code, rng: &mut SmallRng) -> Result<usize> {
        let mut edits = EditBuffer::new();
        let mut obfuscated = 0;
        for (id, insn) in code.instructions.iter() {
            let target = match insn {
                Insn::Jump { opcode, target } if *opcode != GOTO && *opcode != JSR => *target,
                _ => continue,
            };
            let mut builder = InsnBuilder::new(&code.labels);
            decoys(&mut builder, target, rng);
            edits.insert(id, builder.build());
            obfuscated += 1;
        }
        edits.commit(&mut code.instructions)?;
        Ok(obfuscated)
    }
}

fn decoys(builder: &mut InsnBuilder<'_>, target: SynLabel, rng: &mut SmallRng) {
    let next = builder.fresh_label();
    let traps: Vec<SynLabel> = (0..rng.random_range(5..10))
        .map(|_| builder.fresh_label())
        .collect();
    let real = rng.random_range(0..traps.len());

    let mut targets = traps.clone();
    targets[real] = next;
    builder.const_int(real as i32).push(Insn::TableSwitch {
        low: 0,
        high: traps.len() as i32 - 1,
        default: traps[real],
        targets,
    });

    for trap in &traps {
        let hop = traps[rng.random_range(0..traps.len())];
        builder
            .place_label(*trap)
            .access_field(
                GETSTATIC,
                BinaryName::SYSTEM,
                UnqualifiedName::OUT,
                FieldType::object(BinaryName::PRINT_STREAM),
            )
            .const_int(rng.random())
            .invoke(
                INVOKEVIRTUAL,
                BinaryName::PRINT_STREAM,
                UnqualifiedName::PRINTLN,
                MethodDescriptor {
                    parameters: vec![FieldType::int()],
                    return_type: None,
                },
            )
            .const_int(0)
            .jump(IFEQ, target)
            .goto(hop);
    }
    builder.place_label(next);
}

impl Transformer for FlowObfuscation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, context: &mut TransformContext) -> Result<()> {
        let mut obfuscated = 0;
        let rng = &mut context.rng;
        for class in context.repository.program_classes_mut() {
            for method in &mut class.methods {
                if let Some(code) = &mut method.code {
                    obfuscated += Self::obfuscate(code, rng)?;
                }
            }
        }
        log::info!("Added decoy branches after {} conditional jumps", obfuscated);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::model::{ClassEntity, ClassOrigin, MethodBuilder, MethodEntity};
    use crate::jvm::verifier::{verify_method, OpaqueHierarchy};
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, Name, ParseDescriptor};
    use rand::SeedableRng;

    /// `static int sign(int x) { if (x < 0) return -1; return x == 0 ? 0 : 1; }`
    fn sign() -> MethodEntity {
        let builder = MethodBuilder::new(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_string(String::from("sign")).unwrap(),
            MethodDescriptor::parse("(I)I").unwrap(),
        );
        let insns = {
            let mut code = builder.code();
            let positive = code.fresh_label();
            let zero = code.fresh_label();
            code.get_local(0, &FieldType::int())
                .jump(IFGE, positive)
                .const_int(-1)
                .return_(Some(&FieldType::int()))
                .place_label(positive)
                .get_local(0, &FieldType::int())
                .jump(IFEQ, zero)
                .const_int(1)
                .return_(Some(&FieldType::int()))
                .place_label(zero)
                .const_int(0)
                .return_(Some(&FieldType::int()));
            code.build()
        };
        builder.finish(insns)
    }

    #[test]
    fn conditional_jumps_get_decoys() {
        let mut method = sign();
        let mut rng = SmallRng::seed_from_u64(21);
        let code = method.code.as_mut().unwrap();
        assert_eq!(FlowObfuscation::obfuscate(code, &mut rng).unwrap(), 2);

        let insns: Vec<&Insn> = code.instructions.insns().collect();
        let switches: Vec<(usize, &Insn)> = insns
            .iter()
            .enumerate()
            .filter(|(_, insn)| matches!(insn, Insn::TableSwitch { .. }))
            .map(|(index, insn)| (index, *insn))
            .collect();
        assert_eq!(switches.len(), 2);

        for (index, switch) in switches {
            let (high, default, targets) = match switch {
                Insn::TableSwitch {
                    low: 0,
                    high,
                    default,
                    targets,
                } => (*high, *default, targets),
                other => panic!("unexpected {:?}", other),
            };
            assert!((4..9).contains(&high));

            // the switch key is the case that skips the decoys
            let key = match insns[index - 1] {
                Insn::Simple(opcode) => (*opcode - ICONST_0) as usize,
                Insn::Int { operand, .. } => *operand as usize,
                other => panic!("unexpected {:?}", other),
            };
            let real = targets[key];
            assert_ne!(default, real);
            assert!(targets
                .iter()
                .enumerate()
                .all(|(case, label)| (case == key) == (*label == real)));
            let placed = insns
                .iter()
                .filter(|insn| ***insn == Insn::Label(real))
                .count();
            assert_eq!(placed, 1);
        }

        let prints = insns
            .iter()
            .filter(|insn| {
                matches!(insn, Insn::Method { name, .. } if *name == UnqualifiedName::PRINTLN)
            })
            .count();
        assert!(prints >= 10);
    }

    #[test]
    fn obfuscated_code_gets_frames() {
        let mut class = ClassEntity::new(
            BinaryName::from_string(String::from("app/Sign")).unwrap(),
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        );
        let mut method = sign();
        let mut rng = SmallRng::seed_from_u64(3);
        FlowObfuscation::obfuscate(method.code.as_mut().unwrap(), &mut rng).unwrap();
        verify_method(&class, &mut method, &OpaqueHierarchy).unwrap();

        let code = method.code.as_ref().unwrap();
        assert_eq!(code.max_stack, 2);
        let frames = code.frames.as_ref().unwrap();
        assert!(frames.iter().all(|frame| frame.stack.is_empty()));
        class.add_method(method).unwrap();
    }

    #[test]
    fn gotos_are_left_alone() {
        let mut code = Code::new(vec![], Default::default());
        let end = code.fresh_label();
        code.instructions.extend([
            Insn::Jump {
                opcode: GOTO,
                target: end,
            },
            Insn::Label(end),
            Insn::Simple(RETURN),
        ]);
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(FlowObfuscation::obfuscate(&mut code, &mut rng).unwrap(), 0);
        assert_eq!(code.instructions.len(), 3);
    }
}
