use crate::jvm::code::{Insn, InsnId, InsnList};
use std::collections::HashSet;
use thiserror::Error;

/// Instructions to insert: either one instruction or an ordered sequence
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Single(Insn),
    List(Vec<Insn>),
}

impl From<Insn> for Payload {
    fn from(insn: Insn) -> Payload {
        Payload::Single(insn)
    }
}

impl From<Vec<Insn>> for Payload {
    fn from(insns: Vec<Insn>) -> Payload {
        Payload::List(insns)
    }
}

impl Payload {
    fn into_insns(self) -> Vec<Insn> {
        match self {
            Payload::Single(insn) => vec![insn],
            Payload::List(insns) => insns,
        }
    }
}

/// Queued mutation against one instruction stream
#[derive(Clone, Debug)]
enum EditOperation {
    InsertFirst(Payload),
    InsertAfter(InsnId, Payload),
    InsertBefore(InsnId, Payload),
    Remove(InsnId),
}

impl EditOperation {
    fn anchor(&self) -> Option<InsnId> {
        match self {
            EditOperation::InsertFirst(_) => None,
            EditOperation::InsertAfter(anchor, _)
            | EditOperation::InsertBefore(anchor, _)
            | EditOperation::Remove(anchor) => Some(*anchor),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EditError {
    /// The anchor is not in the stream, or an earlier operation of the same session removed it
    #[error("edit #{operation} refers to an instruction that is no longer in the stream ({anchor:?})")]
    StaleAnchor { operation: usize, anchor: InsnId },
}

/// Buffered edits against one method's instruction stream
///
/// Operations are anchored on instruction identities rather than positions, so a transformation
/// can queue edits while walking the original stream without earlier insertions shifting the
/// meaning of later anchors. Nothing touches the stream until [`EditBuffer::commit`], which
/// applies every operation in enqueue order or, if any anchor is stale, none of them.
///
/// Inserting several payloads after the same anchor places the latest one closest to the anchor:
/// `insert(x, a); insert(x, b)` yields `x b a`.
#[derive(Clone, Debug, Default)]
pub struct EditBuffer {
    operations: Vec<EditOperation>,
}

impl EditBuffer {
    pub fn new() -> EditBuffer {
        EditBuffer::default()
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Insert at the very start of the stream
    pub fn insert_first(&mut self, payload: impl Into<Payload>) {
        self.operations
            .push(EditOperation::InsertFirst(payload.into()));
    }

    /// Insert right after the anchor
    pub fn insert(&mut self, anchor: InsnId, payload: impl Into<Payload>) {
        self.operations
            .push(EditOperation::InsertAfter(anchor, payload.into()));
    }

    /// Insert right before the anchor
    pub fn insert_before(&mut self, anchor: InsnId, payload: impl Into<Payload>) {
        self.operations
            .push(EditOperation::InsertBefore(anchor, payload.into()));
    }

    pub fn remove(&mut self, anchor: InsnId) {
        self.operations.push(EditOperation::Remove(anchor));
    }

    /// Insert the payload after the anchor, then remove the anchor
    pub fn replace(&mut self, anchor: InsnId, payload: impl Into<Payload>) {
        self.insert(anchor, payload);
        self.remove(anchor);
    }

    /// Check that every anchor is still attached at the point its operation would run
    fn validate(&self, list: &InsnList) -> Result<(), EditError> {
        let mut removed = HashSet::new();
        for (operation, edit) in self.operations.iter().enumerate() {
            if let Some(anchor) = edit.anchor() {
                if !list.contains(anchor) || removed.contains(&anchor) {
                    return Err(EditError::StaleAnchor { operation, anchor });
                }
            }
            if let EditOperation::Remove(anchor) = edit {
                removed.insert(*anchor);
            }
        }
        Ok(())
    }

    /// Apply every queued operation in enqueue order
    ///
    /// Returns the number of operations applied. On error the stream is left unmodified.
    pub fn commit(self, list: &mut InsnList) -> Result<usize, EditError> {
        self.validate(list)?;

        let applied = self.operations.len();
        for (operation, edit) in self.operations.into_iter().enumerate() {
            match edit {
                EditOperation::InsertFirst(payload) => {
                    let mut cursor = None;
                    for insn in payload.into_insns() {
                        cursor = Some(match cursor {
                            None => list.push_front(insn),
                            Some(prev) => list
                                .insert_after(prev, insn)
                                .ok_or(EditError::StaleAnchor { operation, anchor: prev })?,
                        });
                    }
                }
                EditOperation::InsertAfter(anchor, payload) => {
                    let mut cursor = anchor;
                    for insn in payload.into_insns() {
                        cursor = list
                            .insert_after(cursor, insn)
                            .ok_or(EditError::StaleAnchor { operation, anchor })?;
                    }
                }
                EditOperation::InsertBefore(anchor, payload) => {
                    for insn in payload.into_insns() {
                        list.insert_before(anchor, insn)
                            .ok_or(EditError::StaleAnchor { operation, anchor })?;
                    }
                }
                EditOperation::Remove(anchor) => {
                    list.remove(anchor);
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcode::*;

    fn opcodes(list: &InsnList) -> Vec<u8> {
        list.insns().filter_map(Insn::opcode).collect()
    }

    #[test]
    fn shared_anchor_order() {
        let mut list: InsnList = vec![Insn::Simple(NOP), Insn::Simple(DUP), Insn::Simple(RETURN)]
            .into_iter()
            .collect();
        let ids = list.ids();
        let (first, anchor, last) = (ids[0], ids[1], ids[2]);

        let mut buffer = EditBuffer::new();
        buffer.insert(first, Insn::Simple(ICONST_0));
        buffer.insert(anchor, Insn::Simple(POP));
        buffer.insert_before(last, vec![Insn::Simple(ICONST_1), Insn::Simple(POP)]);
        buffer.insert(anchor, vec![Insn::Simple(SWAP), Insn::Simple(POP2)]);
        buffer.remove(anchor);
        buffer.insert_first(Insn::Simple(ACONST_NULL));
        assert_eq!(buffer.commit(&mut list), Ok(6));

        assert_eq!(
            opcodes(&list),
            vec![ACONST_NULL, NOP, ICONST_0, SWAP, POP2, POP, ICONST_1, POP, RETURN]
        );
    }

    #[test]
    fn stale_anchor_aborts_everything() {
        let mut list: InsnList = vec![Insn::Simple(NOP), Insn::Simple(RETURN)]
            .into_iter()
            .collect();
        let ids = list.ids();

        let mut buffer = EditBuffer::new();
        buffer.insert(ids[1], Insn::Simple(POP));
        buffer.remove(ids[0]);
        buffer.insert(ids[0], Insn::Simple(DUP));
        assert_eq!(
            buffer.commit(&mut list),
            Err(EditError::StaleAnchor {
                operation: 2,
                anchor: ids[0]
            })
        );
        assert_eq!(opcodes(&list), vec![NOP, RETURN]);
    }

    #[test]
    fn replace_keeps_payload_order() {
        let mut list: InsnList = vec![Insn::Simple(NOP), Insn::Simple(RETURN)]
            .into_iter()
            .collect();
        let nop = list.ids()[0];

        let mut buffer = EditBuffer::new();
        buffer.replace(nop, vec![Insn::Simple(ICONST_1), Insn::Simple(POP)]);
        buffer.commit(&mut list).unwrap();
        assert_eq!(opcodes(&list), vec![ICONST_1, POP, RETURN]);
    }
}
