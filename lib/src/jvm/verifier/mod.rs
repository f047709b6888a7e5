//! Structural bytecode checks
//!
//! This is not a type-checking verifier. It follows stack _heights_ (not stack types) through
//! every path of a method body, which is enough to catch the mistakes a transformation is likely
//! to make: leaving the stack unbalanced across a jump, branching to a label that was never
//! placed, or forgetting a terminating instruction. The same pass produces the `max_stack` and
//! `max_locals` values the class file needs.
//!
//! Every position is an index into the full instruction stream (labels and line numbers
//! included), which is also how [`InsnPrinter`] numbers instructions.
//!
//! Classes from version 50 on also get their `StackMapTable` frames computed here, by a second
//! pass that does track types (see [`FrameComputer`]). That pass also finds dead code, which is
//! removed, since the JVM refuses unreachable code it has no frame for.

mod frames;
mod types;

pub use frames::*;
pub use types::*;

use crate::jvm::code::opcode::*;
use crate::jvm::code::{Code, Insn, InsnPrinter, SynLabel};
use crate::jvm::model::{ClassEntity, MethodEntity};
use crate::jvm::{BinaryName, Name, RenderDescriptor};
use crate::{Error, Result};
use std::collections::HashMap;

/// Sizes computed for a method body that passed verification
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Maxs {
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Position and cause of a verification failure
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerifyFailure {
    /// Index of the offending instruction in the stream
    pub index: usize,
    pub message: String,

    /// Stack height before each instruction, as far as the analysis got (`None` if unreached)
    pub heights: Vec<Option<usize>>,
}

impl VerifyFailure {
    fn new(index: usize, message: impl Into<String>) -> VerifyFailure {
        VerifyFailure {
            index,
            message: message.into(),
            heights: vec![],
        }
    }
}

/// Stack height data-flow over one method body
pub struct StackVerifier<'a> {
    insns: Vec<&'a Insn>,
    code: &'a Code,
    label_positions: HashMap<SynLabel, usize>,
    heights: Vec<Option<usize>>,
    worklist: Vec<usize>,
    max_stack: usize,
}

impl<'a> StackVerifier<'a> {
    /// Check a method and compute its sizes
    ///
    /// Methods without a body (abstract or native) trivially pass with zero sizes.
    pub fn verify(method: &'a MethodEntity) -> std::result::Result<Maxs, VerifyFailure> {
        let code = match &method.code {
            Some(code) => code,
            None => {
                return Ok(Maxs {
                    max_stack: 0,
                    max_locals: 0,
                })
            }
        };

        let insns: Vec<&Insn> = code.instructions.insns().collect();
        let mut verifier = StackVerifier {
            heights: vec![None; insns.len()],
            insns,
            code,
            label_positions: HashMap::new(),
            worklist: vec![],
            max_stack: 0,
        };
        if let Err(mut failure) = verifier.run() {
            failure.heights = verifier.heights;
            return Err(failure);
        }

        let max_locals = verifier.max_locals(method)?;
        let max_stack = u16::try_from(verifier.max_stack).map_err(|_| {
            VerifyFailure::new(0, format!("stack grows to {}", verifier.max_stack))
        })?;
        Ok(Maxs {
            max_stack,
            max_locals,
        })
    }

    fn run(&mut self) -> std::result::Result<(), VerifyFailure> {
        self.place_labels()?;
        self.check_label_uses()?;

        if self.insns.is_empty() {
            return Err(VerifyFailure::new(0, "method body is empty"));
        }
        self.enter(0, 0, 0)?;
        let code = self.code;
        for block in &code.try_catch_blocks {
            let handler = self.label_positions[&block.handler];
            self.enter(handler, handler, 1)?;
        }
        while let Some(index) = self.worklist.pop() {
            self.step(index)?;
        }
        Ok(())
    }

    fn place_labels(&mut self) -> std::result::Result<(), VerifyFailure> {
        for (index, insn) in self.insns.iter().enumerate() {
            if let Insn::Label(label) = insn {
                if self.label_positions.insert(*label, index).is_some() {
                    return Err(VerifyFailure::new(index, "label is placed twice"));
                }
            }
        }
        Ok(())
    }

    /// Every label that something refers to must be placed
    fn check_label_uses(&self) -> std::result::Result<(), VerifyFailure> {
        let placed = |label: &SynLabel| self.label_positions.contains_key(label);
        for (index, insn) in self.insns.iter().enumerate() {
            if insn.is_malformed_switch() {
                let message = "tableswitch targets do not match its range";
                return Err(VerifyFailure::new(index, message));
            }
            let mut used = insn.jump_targets();
            if let Insn::LineNumber { start, .. } = insn {
                used.push(*start);
            }
            if let Some(label) = used.iter().find(|label| !placed(label)) {
                let message = format!("reference to unplaced label {:?}", label);
                return Err(VerifyFailure::new(index, message));
            }
        }
        for block in &self.code.try_catch_blocks {
            for label in [block.start, block.end, block.handler] {
                if !placed(&label) {
                    let message = format!("exception handler uses unplaced label {:?}", label);
                    return Err(VerifyFailure::new(0, message));
                }
            }
        }
        for local in &self.code.local_variables {
            if !placed(&local.start) || !placed(&local.end) {
                let message = format!("local variable '{}' uses unplaced labels", local.name);
                return Err(VerifyFailure::new(0, message));
            }
        }
        Ok(())
    }

    /// Record that control reaches `index` with the given stack height
    fn enter(
        &mut self,
        from: usize,
        index: usize,
        height: usize,
    ) -> std::result::Result<(), VerifyFailure> {
        if index >= self.insns.len() {
            return Err(VerifyFailure::new(from, "control falls off the end of the code"));
        }
        self.max_stack = self.max_stack.max(height);
        match self.heights[index] {
            None => {
                self.heights[index] = Some(height);
                self.worklist.push(index);
                Ok(())
            }
            Some(existing) if existing == height => Ok(()),
            Some(existing) => Err(VerifyFailure::new(
                index,
                format!(
                    "inconsistent stack height at merge point: {} and {}",
                    existing, height
                ),
            )),
        }
    }

    fn step(&mut self, index: usize) -> std::result::Result<(), VerifyFailure> {
        let insn = self.insns[index];
        let height = self.heights[index].unwrap_or(0);
        let (pops, pushes) = stack_effect(insn);
        if height < pops {
            let message = format!(
                "stack underflow: needs {} slot(s) but height is {}",
                pops, height
            );
            return Err(VerifyFailure::new(index, message));
        }
        let after = height - pops + pushes;
        self.max_stack = self.max_stack.max(after);

        for target in insn.jump_targets() {
            let position = self.label_positions[&target];
            self.enter(index, position, after)?;
        }
        if !insn.ends_block() {
            self.enter(index, index + 1, after)?;
        }
        Ok(())
    }

    fn max_locals(&self, method: &MethodEntity) -> std::result::Result<u16, VerifyFailure> {
        let mut max_locals = method.descriptor.parameter_length(!method.is_static());
        for (index, insn) in self.insns.iter().enumerate() {
            let end = match insn {
                Insn::Var { opcode, index: slot } => {
                    let wide = matches!(*opcode, LLOAD | DLOAD | LSTORE | DSTORE);
                    *slot as usize + if wide { 2 } else { 1 }
                }
                Insn::Iinc { index: slot, .. } => *slot as usize + 1,
                _ => continue,
            };
            if end > u16::MAX as usize {
                let message = format!("local index {} is out of range", end - 1);
                return Err(VerifyFailure::new(index, message));
            }
            max_locals = max_locals.max(end);
        }
        u16::try_from(max_locals)
            .map_err(|_| VerifyFailure::new(0, format!("{} parameter slots", max_locals)))
    }
}

/// Slots popped and pushed by an instruction
fn stack_effect(insn: &Insn) -> (usize, usize) {
    match insn {
        Insn::Simple(opcode) => simple_effect(*opcode),
        Insn::Int { opcode, .. } => match *opcode {
            NEWARRAY => (1, 1),
            _ => (0, 1),
        },
        Insn::Var { opcode, .. } => match *opcode {
            ILOAD | FLOAD | ALOAD => (0, 1),
            LLOAD | DLOAD => (0, 2),
            ISTORE | FSTORE | ASTORE => (1, 0),
            LSTORE | DSTORE => (2, 0),
            _ => (0, 0),
        },
        Insn::Type { opcode, .. } => match *opcode {
            NEW => (0, 1),
            _ => (1, 1),
        },
        Insn::Field {
            opcode, descriptor, ..
        } => {
            let width = descriptor.width();
            match *opcode {
                GETSTATIC => (0, width),
                PUTSTATIC => (width, 0),
                GETFIELD => (1, width),
                _ => (1 + width, 0),
            }
        }
        Insn::Method {
            opcode, descriptor, ..
        } => (
            descriptor.parameter_length(*opcode != INVOKESTATIC),
            descriptor.return_type.as_ref().map_or(0, |ret| ret.width()),
        ),
        Insn::InvokeDynamic { descriptor, .. } => (
            descriptor.parameter_length(false),
            descriptor.return_type.as_ref().map_or(0, |ret| ret.width()),
        ),
        Insn::Jump { opcode, .. } => match *opcode {
            IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IFNULL | IFNONNULL => (1, 0),
            IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE | IF_ACMPEQ
            | IF_ACMPNE => (2, 0),
            JSR => (0, 1),
            _ => (0, 0),
        },
        Insn::Ldc(constant) => (0, if constant.is_wide() { 2 } else { 1 }),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::MultiANewArray { dimensions, .. } => (*dimensions as usize, 1),
        Insn::Iinc { .. } | Insn::Label(_) | Insn::LineNumber { .. } => (0, 0),
    }
}

fn simple_effect(opcode: u8) -> (usize, usize) {
    match opcode {
        ACONST_NULL | ICONST_M1..=ICONST_5 | FCONST_0..=FCONST_2 => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => (0, 2),
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => (2, 1),
        LALOAD | DALOAD => (2, 2),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, 0),
        LASTORE | DASTORE => (4, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),

        // `iadd` through `drem` cycle through int, long, float, double
        IADD..=DREM => match (opcode - IADD) % 4 {
            1 | 3 => (4, 2),
            _ => (2, 1),
        },
        INEG | FNEG => (1, 1),
        LNEG | DNEG => (2, 2),
        ISHL | ISHR | IUSHR => (2, 1),
        LSHL | LSHR | LUSHR => (3, 2),
        IAND | IOR | IXOR => (2, 1),
        LAND | LOR | LXOR => (4, 2),

        I2F | F2I | I2B | I2C | I2S => (1, 1),
        I2L | I2D | F2L | F2D => (1, 2),
        L2I | L2F | D2I | D2F => (2, 1),
        L2D | D2L => (2, 2),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),

        IRETURN | FRETURN | ARETURN | ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        LRETURN | DRETURN => (2, 0),
        ARRAYLENGTH => (1, 1),
        _ => (0, 0),
    }
}

/// Render a failure report for a method, with a marker line before the offending instruction
///
/// Each instruction is prefixed with the stack height on entry to it, or `-` when the analysis
/// never reached it.
pub fn dump_failure(class: &ClassEntity, method: &MethodEntity, failure: &VerifyFailure) -> String {
    let mut lines = vec![
        String::from("---------------- Bytecode verification failed ----------------"),
        format!(
            "MethodInfo: Owner: {} Name: {} Descriptor: {} Modifiers: {}",
            class.name.as_str(),
            method.name.as_str(),
            method.descriptor.render(),
            method.access_flags.modifiers()
        ),
        format!("Reason: {}", failure.message),
    ];
    if let Some(code) = &method.code {
        let printer = InsnPrinter::new(&code.instructions);
        for (index, insn) in code.instructions.insns().enumerate() {
            if index == failure.index {
                lines.push(format!("-----> Error at instruction {}", index));
            }
            let height = match failure.heights.get(index).copied().flatten() {
                Some(height) => height.to_string(),
                None => String::from("-"),
            };
            lines.push(format!("{:>4} | {}", height, printer.render(index, insn)));
        }
    }
    lines.join("\n")
}

/// Verify one method and store its computed sizes and frames
///
/// Frames are only computed for class files recent enough to need a `StackMapTable`; unreachable
/// instructions are removed from those first. A failure is logged with a full instruction dump
/// and turned into [`Error::Verification`].
pub fn verify_method(
    class: &ClassEntity,
    method: &mut MethodEntity,
    hierarchy: &dyn TypeHierarchy,
) -> Result<()> {
    let with_frames = class.version.major_version >= 50;
    match analyze(&class.name, method, hierarchy, with_frames) {
        Ok(()) => Ok(()),
        Err(failure) => {
            log::error!("{}", dump_failure(class, method, &failure));
            Err(Error::Verification {
                method: format!(
                    "{}.{}{}",
                    class.name.as_str(),
                    method.name.as_str(),
                    method.descriptor.render()
                ),
                index: failure.index,
                message: failure.message,
            })
        }
    }
}

fn analyze(
    owner: &BinaryName,
    method: &mut MethodEntity,
    hierarchy: &dyn TypeHierarchy,
    with_frames: bool,
) -> std::result::Result<(), VerifyFailure> {
    store_maxs(method)?;
    if !with_frames || method.code.is_none() {
        return Ok(());
    }

    let mut analysis = FrameComputer::compute(owner, method, hierarchy)?;
    if !analysis.unreachable.is_empty() {
        log::debug!(
            "Removing {} unreachable instruction(s) from {}.{}",
            analysis.unreachable.len(),
            owner.as_str(),
            method.name.as_str()
        );
        if let Some(code) = method.code.as_mut() {
            for id in &analysis.unreachable {
                code.instructions.remove(*id);
            }
        }
        store_maxs(method)?;
        analysis = FrameComputer::compute(owner, method, hierarchy)?;
    }
    if let Some(code) = method.code.as_mut() {
        code.frames = Some(analysis.frames);
    }
    Ok(())
}

fn store_maxs(method: &mut MethodEntity) -> std::result::Result<(), VerifyFailure> {
    let maxs = StackVerifier::verify(method)?;
    if let Some(code) = method.code.as_mut() {
        code.max_stack = maxs.max_stack;
        code.max_locals = maxs.max_locals;
        code.frames = None;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::TryCatchBlock;
    use crate::jvm::model::{ClassOrigin, MethodBuilder};
    use crate::jvm::*;

    fn method(flags: MethodAccessFlags, parameters: Vec<FieldType<BinaryName>>) -> MethodBuilder {
        MethodBuilder::new(
            flags,
            UnqualifiedName::from_string(String::from("run")).unwrap(),
            MethodDescriptor {
                parameters,
                return_type: Some(FieldType::int()),
            },
        )
    }

    #[test]
    fn computes_sizes() {
        let builder = method(MethodAccessFlags::STATIC, vec![FieldType::long()]);
        let insns = {
            let mut code = builder.code();
            code.get_local(0, &FieldType::long())
                .const_long(3)
                .simple(LADD)
                .simple(L2I)
                .return_(Some(&FieldType::int()));
            code.build()
        };
        let method = builder.finish(insns);
        let maxs = StackVerifier::verify(&method).unwrap();
        assert_eq!(
            maxs,
            Maxs {
                max_stack: 4,
                max_locals: 2
            }
        );
    }

    #[test]
    fn switch_arms_must_agree() {
        let builder = method(MethodAccessFlags::STATIC, vec![FieldType::int()]);
        let insns = {
            let mut code = builder.code();
            code.get_local(0, &FieldType::int()).table_switch(
                0,
                1,
                |code| {
                    code.const_int(-1).return_(Some(&FieldType::int()));
                },
                |code, case| {
                    code.const_int(case).return_(Some(&FieldType::int()));
                },
            );
            code.build()
        };
        let method = builder.finish(insns);
        assert!(StackVerifier::verify(&method).is_ok());
    }

    #[test]
    fn reports_underflow_at_instruction() {
        let builder = method(MethodAccessFlags::STATIC, vec![]);
        let insns = {
            let mut code = builder.code();
            code.const_int(1).simple(IADD).return_(Some(&FieldType::int()));
            code.build()
        };
        let method = builder.finish(insns);
        let failure = StackVerifier::verify(&method).unwrap_err();
        assert_eq!(failure.index, 1);
        assert!(failure.message.contains("underflow"));
    }

    #[test]
    fn reports_inconsistent_merge() {
        let builder = method(MethodAccessFlags::STATIC, vec![FieldType::int()]);
        let insns = {
            let mut code = builder.code();
            let join = code.fresh_label();
            code.get_local(0, &FieldType::int())
                .jump(IFEQ, join)
                .const_int(7)
                .place_label(join)
                .const_int(1)
                .return_(Some(&FieldType::int()));
            code.build()
        };
        let method = builder.finish(insns);
        let failure = StackVerifier::verify(&method).unwrap_err();
        assert!(failure.message.contains("inconsistent"));
    }

    #[test]
    fn reports_structural_mistakes() {
        // Falls off the end
        let builder = method(MethodAccessFlags::STATIC, vec![]);
        let insns = {
            let mut code = builder.code();
            code.const_int(1).simple(POP);
            code.build()
        };
        let failure = StackVerifier::verify(&builder.finish(insns)).unwrap_err();
        assert!(failure.message.contains("falls off"));

        // Jumps nowhere
        let builder = method(MethodAccessFlags::STATIC, vec![]);
        let insns = {
            let mut code = builder.code();
            let nowhere = code.fresh_label();
            code.jump(GOTO, nowhere);
            code.build()
        };
        let failure = StackVerifier::verify(&builder.finish(insns)).unwrap_err();
        assert!(failure.message.contains("unplaced"));

        // Placed twice
        let builder = method(MethodAccessFlags::STATIC, vec![]);
        let insns = {
            let mut code = builder.code();
            let twice = code.fresh_label();
            code.place_label(twice)
                .place_label(twice)
                .const_int(0)
                .return_(Some(&FieldType::int()));
            code.build()
        };
        let failure = StackVerifier::verify(&builder.finish(insns)).unwrap_err();
        assert_eq!(failure.index, 1);
    }

    #[test]
    fn rejects_malformed_table_switch() {
        let builder = method(MethodAccessFlags::STATIC, vec![FieldType::int()]);
        let insns = {
            let mut code = builder.code();
            let default = code.fresh_label();
            let one = code.fresh_label();
            code.get_local(0, &FieldType::int())
                .push(Insn::TableSwitch {
                    low: 0,
                    high: 1,
                    default,
                    targets: vec![one],
                })
                .place_label(one)
                .place_label(default)
                .const_int(0)
                .return_(Some(&FieldType::int()));
            code.build()
        };
        let failure = StackVerifier::verify(&builder.finish(insns)).unwrap_err();
        assert_eq!(failure.index, 1);
        assert!(failure.message.contains("tableswitch"));
    }

    #[test]
    fn handlers_start_with_the_exception() {
        let builder = method(MethodAccessFlags::STATIC, vec![]);
        let (insns, block) = {
            let mut code = builder.code();
            let start = code.fresh_label();
            let end = code.fresh_label();
            let handler = code.fresh_label();
            code.place_label(start)
                .const_int(1)
                .return_(Some(&FieldType::int()))
                .place_label(end)
                .place_label(handler)
                .simple(POP)
                .const_int(0)
                .return_(Some(&FieldType::int()));
            let block = TryCatchBlock {
                start,
                end,
                handler,
                catch_type: None,
            };
            (code.build(), block)
        };
        let mut method = builder.finish(insns);
        method.code.as_mut().unwrap().try_catch_blocks.push(block);
        assert!(StackVerifier::verify(&method).is_ok());
    }

    #[test]
    fn dump_marks_offender() {
        let class = ClassEntity::new(
            BinaryName::from_string(String::from("demo/Broken")).unwrap(),
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        );
        let builder = method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, vec![]);
        let insns = {
            let mut code = builder.code();
            code.simple(POP).const_int(0).return_(Some(&FieldType::int()));
            code.build()
        };
        let mut method = builder.finish(insns);
        let dump = dump_failure(
            &class,
            &method,
            &StackVerifier::verify(&method).unwrap_err(),
        );
        let lines: Vec<&str> = dump.lines().collect();
        assert!(lines[1].contains("Owner: demo/Broken Name: run Descriptor: ()I"));
        assert!(lines[1].ends_with("Modifiers: public static"));
        assert_eq!(lines[3], "-----> Error at instruction 0");
        assert_eq!(lines[4], "   0 | [0] pop");
        assert_eq!(lines[5], "   - | [1] iconst_0");

        let err = verify_method(&class, &mut method, &OpaqueHierarchy).unwrap_err();
        assert!(matches!(err, Error::Verification { index: 0, .. }));
    }
}
