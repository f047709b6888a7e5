//! Stack map frame computation
//!
//! A second data-flow pass, run once stack heights are known to be consistent. This one tracks
//! the verification _type_ of every local and stack slot, merging at join points through a
//! [`TypeHierarchy`]. The resulting frames are placed at every branch target, every exception
//! handler, and after every instruction that does not fall through.
//!
//! Wide values take two slots while frames are computed (the second one is `Top`), so that the
//! `dup`/`pop`/`swap` family can be handled slot by slot.

use super::types::{merge_types, TypeHierarchy};
use super::{simple_effect, stack_effect, VerifyFailure};
use crate::jvm::code::opcode::*;
use crate::jvm::code::{
    from_slots, to_slots, Code, Constant, Frame, Insn, InsnId, SynLabel, VerificationType,
};
use crate::jvm::model::MethodEntity;
use crate::jvm::{ArrayType, BaseType, BinaryName, FieldType, RefType, UnqualifiedName};
use std::collections::{BTreeSet, HashMap};

type VResult<T> = std::result::Result<T, VerifyFailure>;

/// Types of the locals and stack at one point, one entry per slot
#[derive(Clone, Debug, PartialEq)]
struct State {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

/// Outcome of frame computation
#[derive(Debug)]
pub struct FrameAnalysis {
    pub frames: Vec<Frame>,

    /// Real instructions that no path reaches
    pub unreachable: Vec<InsnId>,
}

struct Handler {
    start: usize,
    end: usize,
    handler: usize,
    exception: VerificationType,
}

/// Frame computation over one method body
pub struct FrameComputer<'a> {
    owner: &'a BinaryName,
    insns: Vec<(InsnId, &'a Insn)>,
    label_positions: HashMap<SynLabel, usize>,
    handlers: Vec<Handler>,
    states: Vec<Option<State>>,
    worklist: Vec<usize>,
    hierarchy: &'a dyn TypeHierarchy,
}

impl<'a> FrameComputer<'a> {
    /// Compute the frames of a method
    ///
    /// Expects `max_locals` to already be computed (see [`super::StackVerifier`]). Methods
    /// without a body have no frames.
    pub fn compute(
        owner: &'a BinaryName,
        method: &'a MethodEntity,
        hierarchy: &'a dyn TypeHierarchy,
    ) -> VResult<FrameAnalysis> {
        let code: &Code = match &method.code {
            Some(code) => code,
            None => {
                return Ok(FrameAnalysis {
                    frames: vec![],
                    unreachable: vec![],
                })
            }
        };
        let insns: Vec<(InsnId, &Insn)> = code.instructions.iter().collect();
        let mut label_positions = HashMap::new();
        for (index, (_, insn)) in insns.iter().enumerate() {
            if let Insn::Label(label) = insn {
                label_positions.insert(*label, index);
            }
        }
        let position = |label: &SynLabel| {
            label_positions.get(label).copied().ok_or_else(|| {
                VerifyFailure::new(0, format!("reference to unplaced label {:?}", label))
            })
        };
        let handlers = code
            .try_catch_blocks
            .iter()
            .map(|block| {
                let exception = block.catch_type.clone().unwrap_or(BinaryName::THROWABLE);
                Ok(Handler {
                    start: position(&block.start)?,
                    end: position(&block.end)?,
                    handler: position(&block.handler)?,
                    exception: VerificationType::object(exception),
                })
            })
            .collect::<VResult<Vec<_>>>()?;
        if insns.is_empty() {
            return Err(VerifyFailure::new(0, "method body is empty"));
        }

        let mut locals = to_slots(&Frame::initial_locals(owner, method));
        let max_locals = (code.max_locals as usize).max(locals.len());
        locals.resize(max_locals, VerificationType::Top);

        let mut computer = FrameComputer {
            owner,
            states: vec![None; insns.len()],
            insns,
            label_positions,
            handlers,
            worklist: vec![],
            hierarchy,
        };
        let outcome = computer
            .enter(0, State { locals, stack: vec![] })
            .and_then(|()| {
                while let Some(index) = computer.worklist.pop() {
                    computer.step(index)?;
                }
                Ok(())
            });
        match outcome {
            Ok(()) => Ok(computer.finish()),
            Err(mut failure) => {
                failure.heights = computer
                    .states
                    .iter()
                    .map(|state| state.as_ref().map(|state| state.stack.len()))
                    .collect();
                Err(failure)
            }
        }
    }

    /// Merge `incoming` into the state at `index`, queueing it when anything changed
    fn enter(&mut self, index: usize, incoming: State) -> VResult<()> {
        if index >= self.insns.len() {
            return Err(VerifyFailure::new(index, "control falls off the end of the code"));
        }
        let merged = match &self.states[index] {
            None => incoming,
            Some(existing) => {
                if existing.stack.len() != incoming.stack.len() {
                    let message = format!(
                        "inconsistent stack height at merge point: {} and {}",
                        existing.stack.len(),
                        incoming.stack.len()
                    );
                    return Err(VerifyFailure::new(index, message));
                }
                let merge = |left: &[VerificationType], right: &[VerificationType]| {
                    left.iter()
                        .zip(right)
                        .map(|(left, right)| merge_types(self.hierarchy, left, right))
                        .collect::<Vec<_>>()
                };
                let merged = State {
                    locals: merge(&existing.locals, &incoming.locals),
                    stack: merge(&existing.stack, &incoming.stack),
                };
                if &merged == existing {
                    return Ok(());
                }
                merged
            }
        };
        self.states[index] = Some(merged);
        self.worklist.push(index);
        Ok(())
    }

    fn enter_label(&mut self, label: &SynLabel, state: State) -> VResult<()> {
        match self.label_positions.get(label) {
            Some(index) => self.enter(*index, state),
            None => Err(VerifyFailure::new(0, format!("jump to unplaced label {:?}", label))),
        }
    }

    fn step(&mut self, index: usize) -> VResult<()> {
        let (id, insn) = self.insns[index];
        let before = match &self.states[index] {
            Some(state) => state.clone(),
            None => return Ok(()),
        };
        if insn.is_pseudo() {
            return self.enter(index + 1, before);
        }

        let mut after = before.clone();
        self.execute(index, id, insn, &mut after)?;

        let covering: Vec<(usize, VerificationType)> = self
            .handlers
            .iter()
            .filter(|handler| handler.start <= index && index < handler.end)
            .map(|handler| (handler.handler, handler.exception.clone()))
            .collect();
        for (handler, exception) in covering {
            for locals in [&before.locals, &after.locals] {
                let state = State {
                    locals: locals.clone(),
                    stack: vec![exception.clone()],
                };
                self.enter(handler, state)?;
            }
        }

        for target in insn.jump_targets() {
            self.enter_label(&target, after.clone())?;
        }
        if !insn.ends_block() {
            self.enter(index + 1, after)?;
        }
        Ok(())
    }

    fn execute(&self, index: usize, id: InsnId, insn: &Insn, state: &mut State) -> VResult<()> {
        use VerificationType as V;
        let (pops, _) = stack_effect(insn);
        match insn {
            Insn::Simple(opcode) => return self.execute_simple(index, *opcode, state),
            Insn::Int { opcode, operand } => {
                pop(index, state, pops)?;
                if *opcode == NEWARRAY {
                    let element = array_element(*operand)
                        .ok_or_else(|| VerifyFailure::new(index, "unknown array type"))?;
                    push(state, V::Object(RefType::array(FieldType::Base(element))));
                } else {
                    push(state, V::Integer);
                }
            }
            Insn::Var { opcode, index: slot } => {
                let slot = *slot as usize;
                match *opcode {
                    ILOAD => push(state, V::Integer),
                    LLOAD => push(state, V::Long),
                    FLOAD => push(state, V::Float),
                    DLOAD => push(state, V::Double),
                    ALOAD => {
                        let local = state.locals.get(slot).cloned().ok_or_else(|| {
                            VerifyFailure::new(index, format!("local {} is out of range", slot))
                        })?;
                        push(state, local);
                    }
                    ISTORE | LSTORE | FSTORE | DSTORE | ASTORE => {
                        let width = if matches!(*opcode, LSTORE | DSTORE) { 2 } else { 1 };
                        let value = pop(index, state, width)?.swap_remove(0);
                        store(index, state, slot, value)?;
                    }
                    _ => return Err(VerifyFailure::new(index, "subroutines are not supported")),
                }
            }
            Insn::Type { opcode, class } => {
                pop(index, state, pops)?;
                match *opcode {
                    NEW => push(state, V::Uninitialized(id)),
                    ANEWARRAY => {
                        let element = FieldType::Ref(class.clone());
                        push(state, V::Object(RefType::array(element)));
                    }
                    CHECKCAST => push(state, V::Object(class.clone())),
                    _ => push(state, V::Integer),
                }
            }
            Insn::Field {
                opcode, descriptor, ..
            } => {
                pop(index, state, pops)?;
                if matches!(*opcode, GETSTATIC | GETFIELD) {
                    push(state, V::from(descriptor));
                }
            }
            Insn::Method {
                opcode,
                name,
                descriptor,
                ..
            } => {
                let arguments = descriptor.parameter_length(false);
                pop(index, state, arguments)?;
                if *opcode != INVOKESTATIC {
                    let receiver = pop(index, state, 1)?.swap_remove(0);
                    if *opcode == INVOKESPECIAL && *name == UnqualifiedName::INIT {
                        self.initialize(index, state, receiver)?;
                    }
                }
                if let Some(return_type) = &descriptor.return_type {
                    push(state, V::from(return_type));
                }
            }
            Insn::InvokeDynamic { descriptor, .. } => {
                pop(index, state, pops)?;
                if let Some(return_type) = &descriptor.return_type {
                    push(state, V::from(return_type));
                }
            }
            Insn::Jump { opcode, .. } => {
                if *opcode == JSR {
                    return Err(VerifyFailure::new(index, "subroutines are not supported"));
                }
                pop(index, state, pops)?;
            }
            Insn::Ldc(constant) => push(
                state,
                match constant {
                    Constant::Integer(_) => V::Integer,
                    Constant::Float(_) => V::Float,
                    Constant::Long(_) => V::Long,
                    Constant::Double(_) => V::Double,
                    Constant::String(_) => V::object(BinaryName::STRING),
                    Constant::Class(_) => V::object(BinaryName::CLASS),
                    Constant::MethodType(_) => V::object(BinaryName::METHOD_TYPE),
                    Constant::MethodHandle(_) => V::object(BinaryName::METHOD_HANDLE),
                },
            ),
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                pop(index, state, 1)?;
            }
            Insn::MultiANewArray { class, .. } => {
                pop(index, state, pops)?;
                push(state, V::Object(class.clone()));
            }
            Insn::Iinc { .. } | Insn::Label(_) | Insn::LineNumber { .. } => (),
        }
        Ok(())
    }

    fn execute_simple(&self, index: usize, opcode: u8, state: &mut State) -> VResult<()> {
        use VerificationType as V;
        match opcode {
            AALOAD => {
                let mut popped = pop(index, state, 2)?;
                let array = popped.swap_remove(0);
                push(state, component_type(&array));
                return Ok(());
            }
            DUP | DUP_X1 | DUP_X2 | DUP2 | DUP2_X1 | DUP2_X2 | SWAP => {
                let (pops, _) = simple_effect(opcode);
                let popped = pop(index, state, pops)?;
                for slot in shuffle(opcode, &popped) {
                    state.stack.push(slot);
                }
                return Ok(());
            }
            _ => (),
        }

        let (pops, _) = simple_effect(opcode);
        pop(index, state, pops)?;
        let result = match opcode {
            ACONST_NULL => V::Null,
            ICONST_M1..=ICONST_5 => V::Integer,
            LCONST_0 | LCONST_1 => V::Long,
            FCONST_0..=FCONST_2 => V::Float,
            DCONST_0 | DCONST_1 => V::Double,
            IALOAD | BALOAD | CALOAD | SALOAD => V::Integer,
            LALOAD => V::Long,
            FALOAD => V::Float,
            DALOAD => V::Double,
            IADD..=DREM | INEG..=DNEG => match (opcode - IADD) % 4 {
                0 => V::Integer,
                1 => V::Long,
                2 => V::Float,
                _ => V::Double,
            },
            ISHL..=LXOR => {
                if (opcode - ISHL) % 2 == 0 {
                    V::Integer
                } else {
                    V::Long
                }
            }
            L2I | F2I | D2I | I2B | I2C | I2S => V::Integer,
            I2L | F2L | D2L => V::Long,
            I2F | L2F | D2F => V::Float,
            I2D | L2D | F2D => V::Double,
            LCMP | FCMPL | FCMPG | DCMPL | DCMPG | ARRAYLENGTH => V::Integer,
            _ => return Ok(()),
        };
        push(state, result);
        Ok(())
    }

    /// Replace every occurrence of an uninitialized value once its constructor was called
    fn initialize(&self, index: usize, state: &mut State, receiver: VerificationType) -> VResult<()> {
        let initialized = match &receiver {
            VerificationType::UninitializedThis => VerificationType::object(self.owner.clone()),
            VerificationType::Uninitialized(new_id) => {
                let class = self.insns.iter().find_map(|(id, insn)| match insn {
                    Insn::Type { opcode: NEW, class } if id == new_id => Some(class.clone()),
                    _ => None,
                });
                match class {
                    Some(class) => VerificationType::Object(class),
                    None => return Err(VerifyFailure::new(index, "constructor call on a lost `new`")),
                }
            }
            _ => return Ok(()),
        };
        for slot in state.locals.iter_mut().chain(state.stack.iter_mut()) {
            if *slot == receiver {
                *slot = initialized.clone();
            }
        }
        Ok(())
    }

    /// Pick out the frames and the dead code
    fn finish(self) -> FrameAnalysis {
        let mut block_starts = BTreeSet::new();
        for (index, (_, insn)) in self.insns.iter().enumerate() {
            for target in insn.jump_targets() {
                if let Some(position) = self.label_positions.get(&target) {
                    block_starts.insert(*position);
                }
            }
            if insn.ends_block() {
                block_starts.insert(index + 1);
            }
        }
        block_starts.extend(self.handlers.iter().map(|handler| handler.handler));

        let mut frames: Vec<Frame> = vec![];
        for start in block_starts {
            let real = (start..self.insns.len()).find(|index| !self.insns[*index].1.is_pseudo());
            let found = real.and_then(|index| Some((index, self.states[index].as_ref()?)));
            let (index, state) = match found {
                Some(found) => found,
                None => continue,
            };
            let at = self.insns[index].0;
            if frames.last().map_or(false, |frame| frame.at == at) {
                continue;
            }
            let mut locals = from_slots(&state.locals);
            while locals.last() == Some(&VerificationType::Top) {
                locals.pop();
            }
            frames.push(Frame {
                at,
                locals,
                stack: from_slots(&state.stack),
            });
        }

        let unreachable = self
            .insns
            .iter()
            .zip(&self.states)
            .filter(|((_, insn), state)| state.is_none() && !insn.is_pseudo())
            .map(|((id, _), _)| *id)
            .collect();
        FrameAnalysis {
            frames,
            unreachable,
        }
    }
}

fn push(state: &mut State, value: VerificationType) {
    let wide = value.is_wide();
    state.stack.push(value);
    if wide {
        state.stack.push(VerificationType::Top);
    }
}

/// Pop `count` slots, returning them bottom first
fn pop(index: usize, state: &mut State, count: usize) -> VResult<Vec<VerificationType>> {
    if state.stack.len() < count {
        return Err(VerifyFailure::new(index, "stack underflow"));
    }
    let at = state.stack.len() - count;
    Ok(state.stack.split_off(at))
}

fn store(index: usize, state: &mut State, slot: usize, value: VerificationType) -> VResult<()> {
    let wide = value.is_wide();
    let end = slot + if wide { 2 } else { 1 };
    if end > state.locals.len() {
        return Err(VerifyFailure::new(index, format!("local {} is out of range", slot)));
    }
    // Overwriting the second half of a wide value invalidates its first half
    if slot > 0 && state.locals[slot - 1].is_wide() {
        state.locals[slot - 1] = VerificationType::Top;
    }
    state.locals[slot] = value;
    if wide {
        state.locals[slot + 1] = VerificationType::Top;
    }
    Ok(())
}

/// Stack slots after a `dup`-family instruction or `swap`, given the popped slots (bottom first)
fn shuffle(opcode: u8, popped: &[VerificationType]) -> Vec<VerificationType> {
    let order: &[usize] = match opcode {
        DUP => &[0, 0],
        DUP_X1 => &[1, 0, 1],
        DUP_X2 => &[2, 0, 1, 2],
        DUP2 => &[0, 1, 0, 1],
        DUP2_X1 => &[1, 2, 0, 1, 2],
        DUP2_X2 => &[2, 3, 0, 1, 2, 3],
        _ => &[1, 0],
    };
    order.iter().map(|slot| popped[*slot].clone()).collect()
}

/// Type of the elements loaded by `aaload` from an array of the given type
fn component_type(array: &VerificationType) -> VerificationType {
    let array = match array {
        VerificationType::Object(array) => array,
        VerificationType::Null => return VerificationType::Null,
        _ => return VerificationType::object(BinaryName::OBJECT),
    };
    let element = match array {
        RefType::ObjectArray(ArrayType {
            additional_dimensions: 0,
            element_type,
        }) => RefType::Object(element_type.clone()),
        RefType::ObjectArray(arr) => RefType::ObjectArray(ArrayType {
            additional_dimensions: arr.additional_dimensions - 1,
            element_type: arr.element_type.clone(),
        }),
        RefType::PrimitiveArray(arr) if arr.additional_dimensions > 0 => {
            RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type,
            })
        }
        _ => RefType::Object(BinaryName::OBJECT),
    };
    VerificationType::Object(element)
}

/// Element type of a `newarray` type code
fn array_element(code: i32) -> Option<BaseType> {
    Some(match code {
        4 => BaseType::Boolean,
        5 => BaseType::Char,
        6 => BaseType::Float,
        7 => BaseType::Double,
        8 => BaseType::Byte,
        9 => BaseType::Short,
        10 => BaseType::Int,
        11 => BaseType::Long,
        _ => return None,
    })
}
