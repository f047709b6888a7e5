use crate::jvm::code::Insn;

/// Stable identity of an instruction inside an [`InsnList`]
///
/// Ids are never reused within one list, so an id keeps pointing at the same instruction no
/// matter what is inserted or removed around it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InsnId(u32);

#[derive(Clone, Debug)]
struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    attached: bool,
}

/// Doubly linked instruction stream backed by an arena
///
/// Removing an instruction detaches its node but keeps the slot, so stale ids are detected
/// instead of aliasing some newer instruction.
#[derive(Clone, Debug, Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    first: Option<InsnId>,
    last: Option<InsnId>,
    len: usize,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList::default()
    }

    /// Number of attached instructions (including labels and line numbers)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<InsnId> {
        self.first
    }

    pub fn last(&self) -> Option<InsnId> {
        self.last
    }

    /// Is the instruction currently part of the stream?
    pub fn contains(&self, id: InsnId) -> bool {
        self.node(id).map_or(false, |node| node.attached)
    }

    pub fn get(&self, id: InsnId) -> Option<&Insn> {
        self.node(id).filter(|node| node.attached).map(|node| &node.insn)
    }

    pub fn get_mut(&mut self, id: InsnId) -> Option<&mut Insn> {
        self.nodes
            .get_mut(id.0 as usize)
            .filter(|node| node.attached)
            .map(|node| &mut node.insn)
    }

    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).filter(|node| node.attached)?.next
    }

    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).filter(|node| node.attached)?.prev
    }

    fn node(&self, id: InsnId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    fn alloc(&mut self, insn: Insn) -> InsnId {
        let id = InsnId(self.nodes.len() as u32);
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
            attached: false,
        });
        id
    }

    /// Link a freshly allocated node between `prev` and `next`
    fn link(&mut self, id: InsnId, prev: Option<InsnId>, next: Option<InsnId>) {
        {
            let node = &mut self.nodes[id.0 as usize];
            node.prev = prev;
            node.next = next;
            node.attached = true;
        }
        match prev {
            Some(prev) => self.nodes[prev.0 as usize].next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(next) => self.nodes[next.0 as usize].prev = Some(id),
            None => self.last = Some(id),
        }
        self.len += 1;
    }

    /// Append an instruction to the end of the stream
    pub fn push_back(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        let last = self.last;
        self.link(id, last, None);
        id
    }

    /// Prepend an instruction to the start of the stream
    pub fn push_front(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        let first = self.first;
        self.link(id, None, first);
        id
    }

    /// Insert right after an attached anchor
    ///
    /// Returns `None` (and leaves the stream untouched) if the anchor is not attached.
    pub fn insert_after(&mut self, anchor: InsnId, insn: Insn) -> Option<InsnId> {
        if !self.contains(anchor) {
            return None;
        }
        let next = self.nodes[anchor.0 as usize].next;
        let id = self.alloc(insn);
        self.link(id, Some(anchor), next);
        Some(id)
    }

    /// Insert right before an attached anchor
    ///
    /// Returns `None` (and leaves the stream untouched) if the anchor is not attached.
    pub fn insert_before(&mut self, anchor: InsnId, insn: Insn) -> Option<InsnId> {
        if !self.contains(anchor) {
            return None;
        }
        let prev = self.nodes[anchor.0 as usize].prev;
        let id = self.alloc(insn);
        self.link(id, prev, Some(anchor));
        Some(id)
    }

    /// Detach an instruction from the stream, returning a copy of it
    pub fn remove(&mut self, id: InsnId) -> Option<Insn> {
        if !self.contains(id) {
            return None;
        }
        let (prev, next) = {
            let node = &mut self.nodes[id.0 as usize];
            node.attached = false;
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.nodes[prev.0 as usize].next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => self.nodes[next.0 as usize].prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
        Some(self.nodes[id.0 as usize].insn.clone())
    }

    /// Iterate over the attached instructions in stream order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.first,
        }
    }

    /// Snapshot of the ids in stream order
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Position of an instruction in the stream (counting pseudo-instructions)
    pub fn index_of(&self, id: InsnId) -> Option<usize> {
        self.iter().position(|(other, _)| other == id)
    }

    /// Instructions in stream order
    pub fn insns(&self) -> impl Iterator<Item = &Insn> {
        self.iter().map(|(_, insn)| insn)
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        let mut list = InsnList::new();
        for insn in iter {
            list.push_back(insn);
        }
        list
    }
}

impl Extend<Insn> for InsnList {
    fn extend<T: IntoIterator<Item = Insn>>(&mut self, iter: T) {
        for insn in iter {
            self.push_back(insn);
        }
    }
}

pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = &self.list.nodes[id.0 as usize];
        self.cursor = node.next;
        Some((id, &node.insn))
    }
}
