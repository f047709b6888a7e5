use crate::jvm::code::opcode::*;
use crate::jvm::code::{Code, EditBuffer, Insn, InsnBuilder};
use crate::transform::{TransformContext, Transformer};
use crate::Result;

/// Hides unconditional jumps behind a `tableswitch`
///
/// Every `goto L` becomes:
///
/// ```text
///     iconst_1
///     tableswitch 0..1 { 0: A, 1: B, default: C }
/// A:  aconst_null
///     athrow
/// B:  goto L
/// C:  aconst_null
///     athrow
/// ```
#[derive(Default)]
pub struct GotoReplacer;

impl GotoReplacer {
    pub const NAME: &'static str = "GotoReplacer";

    /// Rewrite one method body, returning how many jumps were replaced
    pub fn replace_gotos(code: &mut Code) -> Result<usize> {
        let mut edits = EditBuffer::new();
        for (id, insn) in code.instructions.iter() {
            let target = match insn {
                Insn::Jump {
                    opcode: GOTO,
                    target,
                } => *target,
                _ => continue,
            };
            let mut builder = InsnBuilder::new(&code.labels);
            builder.const_int(1).table_switch(
                0,
                1,
                |default| {
                    default.simple(ACONST_NULL).simple(ATHROW);
                },
                |case, value| {
                    if value == 1 {
                        case.goto(target);
                    } else {
                        case.simple(ACONST_NULL).simple(ATHROW);
                    }
                },
            );
            edits.replace(id, builder.build());
        }
        let replaced = edits.len() / 2;
        edits.commit(&mut code.instructions)?;
        Ok(replaced)
    }
}

impl Transformer for GotoReplacer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, context: &mut TransformContext) -> Result<()> {
        let mut replaced = 0;
        for class in context.repository.program_classes_mut() {
            for method in &mut class.methods {
                if let Some(code) = &mut method.code {
                    replaced += Self::replace_gotos(code)?;
                }
            }
        }
        log::info!("Replaced {} gotos", replaced);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::SynLabelGenerator;
    use crate::jvm::model::{MethodBuilder, MethodEntity};
    use crate::jvm::verifier::StackVerifier;
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};

    /// `for (;;) { if (x == 0) return; x--; }`
    fn countdown() -> MethodEntity {
        let builder = MethodBuilder::new(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_string(String::from("countdown")).unwrap(),
            MethodDescriptor::parse("(I)V").unwrap(),
        );
        let insns = {
            let mut code = builder.code();
            let head = code.fresh_label();
            let exit = code.fresh_label();
            code.place_label(head)
                .push(Insn::Var {
                    opcode: ILOAD,
                    index: 0,
                })
                .jump(IFEQ, exit)
                .iinc(0, -1)
                .goto(head)
                .place_label(exit)
                .simple(RETURN);
            code.build()
        };
        builder.finish(insns)
    }

    #[test]
    fn gotos_become_switches() {
        let mut method = countdown();
        let code = method.code.as_mut().unwrap();
        assert_eq!(GotoReplacer::replace_gotos(code).unwrap(), 1);

        let insns: Vec<&Insn> = code.instructions.insns().collect();
        let switch = insns
            .iter()
            .position(|insn| matches!(insn, Insn::TableSwitch { low: 0, high: 1, .. }))
            .unwrap();
        assert_eq!(insns[switch - 1], &Insn::Simple(ICONST_1));

        // the only goto left is the one behind case 1
        let gotos = insns
            .iter()
            .filter(|insn| matches!(insn, Insn::Jump { opcode: GOTO, .. }))
            .count();
        assert_eq!(gotos, 1);
        let throws = insns
            .iter()
            .filter(|insn| ***insn == Insn::Simple(ATHROW))
            .count();
        assert_eq!(throws, 2);

        let maxs = StackVerifier::verify(&method).unwrap();
        assert_eq!(maxs.max_stack, 1);
    }

    #[test]
    fn straight_line_code_is_untouched() {
        let mut code = Code::new(vec![Insn::Simple(RETURN)], SynLabelGenerator::default());
        assert_eq!(GotoReplacer::replace_gotos(&mut code).unwrap(), 0);
        assert_eq!(code.instructions.len(), 1);
    }
}
