use crate::jvm::code::opcode::mnemonic;
use crate::jvm::code::{Constant, Insn, InsnList, SynLabel};
use crate::jvm::{Name, RenderDescriptor};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders instructions for diagnostics
///
/// Labels are numbered in the order they are placed in the stream (`L0`, `L1`, ...), so
/// the output is stable regardless of the internal label ids.
pub struct InsnPrinter {
    label_indices: HashMap<SynLabel, usize>,
}

impl InsnPrinter {
    pub fn new(instructions: &InsnList) -> InsnPrinter {
        let mut label_indices = HashMap::new();
        for insn in instructions.insns() {
            if let Insn::Label(label) = insn {
                let next = label_indices.len();
                label_indices.entry(*label).or_insert(next);
            }
        }
        InsnPrinter { label_indices }
    }

    fn label(&self, label: &SynLabel) -> String {
        match self.label_indices.get(label) {
            Some(index) => format!("L{}", index),
            None => format!("?{:?}", label),
        }
    }

    fn labels<'a>(&self, labels: impl Iterator<Item = &'a SynLabel>) -> String {
        let rendered: Vec<String> = labels.map(|label| self.label(label)).collect();
        format!("[{}]", rendered.join(", "))
    }

    /// Render one instruction as `[index] mnemonic operands`
    pub fn render(&self, index: usize, insn: &Insn) -> String {
        let mut out = format!("[{}] ", index);
        if let Some(opcode) = insn.opcode() {
            out.push_str(mnemonic(opcode));
        }

        let _ = match insn {
            Insn::Simple(_) => Ok(()),
            Insn::Int { operand, .. } => write!(out, " Operand: {}", operand),
            Insn::Var { index, .. } => write!(out, " VarIndex: {}", index),
            Insn::Type { class, .. } => write!(out, " Type: {}", class.render_class_constant()),
            Insn::Field {
                owner,
                name,
                descriptor,
                ..
            } => write!(
                out,
                " Owner: {} Name: {} Descriptor: {}",
                owner.as_str(),
                name.as_str(),
                descriptor.render()
            ),
            Insn::Method {
                owner,
                name,
                descriptor,
                is_interface,
                ..
            } => write!(
                out,
                " Owner: {} Name: {} Descriptor: {} IsInterface: {}",
                owner.render_class_constant(),
                name.as_str(),
                descriptor.render(),
                is_interface
            ),
            Insn::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
            } => write!(
                out,
                " Name: {} Descriptor: {} BootstrapMethod: {}.{}{} BootstrapArguments: {}",
                name.as_str(),
                descriptor.render(),
                bootstrap.handle.owner.as_str(),
                bootstrap.handle.name.as_str(),
                bootstrap.handle.descriptor.render(),
                bootstrap.arguments.len()
            ),
            Insn::Jump { target, .. } => write!(out, " Label: {}", self.label(target)),
            Insn::Ldc(constant) => write!(out, " Value: {}", render_constant(constant)),
            Insn::Iinc { index, increment } => {
                write!(out, " VarIndex: {} Increment: {}", index, increment)
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => write!(
                out,
                " Min: {} Max: {} DefaultLabel: {} Labels: {}",
                low,
                high,
                self.label(default),
                self.labels(targets.iter())
            ),
            Insn::LookupSwitch { default, pairs } => {
                let keys: Vec<String> = pairs.iter().map(|(key, _)| key.to_string()).collect();
                write!(
                    out,
                    " DefaultLabel: {} Keys: [{}] Labels: {}",
                    self.label(default),
                    keys.join(", "),
                    self.labels(pairs.iter().map(|(_, label)| label))
                )
            }
            Insn::MultiANewArray { class, dimensions } => write!(
                out,
                " Descriptor: {} Dimension: {}",
                class.render(),
                dimensions
            ),
            Insn::Label(label) => write!(out, "{}:", self.label(label)),
            Insn::LineNumber { line, start } => write!(
                out,
                "LineNumber StartLabel: {} Line: {}",
                self.label(start),
                line
            ),
        };
        out
    }
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Integer(i) => i.to_string(),
        Constant::Float(f) => format!("{}f", f),
        Constant::Long(l) => format!("{}L", l),
        Constant::Double(d) => format!("{}d", d),
        Constant::String(s) => format!("{:?}", s),
        Constant::Class(class) => class.render(),
        Constant::MethodType(descriptor) => descriptor.render(),
        Constant::MethodHandle(handle) => format!(
            "{}.{}{}",
            handle.owner.as_str(),
            handle.name.as_str(),
            handle.descriptor.render()
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcode::*;
    use crate::jvm::code::{LabelGenerator, SynLabelGenerator};

    #[test]
    fn labels_are_numbered_by_placement() {
        let labels = SynLabelGenerator::default();
        let late = labels.fresh_label();
        let early = labels.fresh_label();
        let list: InsnList = vec![
            Insn::Label(early),
            Insn::Jump {
                opcode: GOTO,
                target: late,
            },
            Insn::Label(late),
            Insn::Int {
                opcode: BIPUSH,
                operand: 7,
            },
        ]
        .into_iter()
        .collect();

        let printer = InsnPrinter::new(&list);
        let lines: Vec<String> = list
            .insns()
            .enumerate()
            .map(|(idx, insn)| printer.render(idx, insn))
            .collect();
        assert_eq!(
            lines,
            vec![
                "[0] L0:",
                "[1] goto Label: L1",
                "[2] L1:",
                "[3] bipush Operand: 7",
            ]
        );
    }
}
