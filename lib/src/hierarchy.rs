//! Whole-program class hierarchy
//!
//! The hierarchy is a snapshot of every class reachable from the program classes (target and
//! synthetic) through superclass and interface edges. Nodes live in an arena and refer to each
//! other by [`NodeId`], so diamond-shaped interface graphs share nodes instead of duplicating them.
//! Inverse edges (subclasses and implementers) are filled in as nodes are created.
//!
//! Besides structure, each node keeps the identities of its members, along with a rename slot per
//! class, field, and method. A slot can be set at most once: deciding names happens strictly
//! before any bytecode is rewritten, and the rewrite reads the decisions back through
//! [`ClassHierarchy::search_field`] and [`ClassHierarchy::search_method`].
//!
//! Once built, the hierarchy is only read (the rename slots and the lazily-computed links are
//! write-once cells), so it can be shared across threads while override closures are computed.

use crate::jvm::model::{ClassEntity, MemberKey};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags, Name, UnqualifiedName,
};
use crate::repository::ClassRepository;
use crate::{Error, Result};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Index of a node in the hierarchy arena
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(u32);

/// Field of a node, by position in the node's field table
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FieldRef {
    pub node: NodeId,
    pub index: usize,
}

/// Method of a node, by position in the node's method table
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MethodRef {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Debug)]
pub struct FieldSlot {
    pub key: MemberKey,
    pub access_flags: FieldAccessFlags,
    new_name: OnceLock<UnqualifiedName>,
}

impl FieldSlot {
    pub fn new_name(&self) -> Option<&UnqualifiedName> {
        self.new_name.get()
    }

    pub fn final_name(&self) -> &UnqualifiedName {
        self.new_name().unwrap_or(&self.key.name)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::FINAL)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::PRIVATE)
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::SYNTHETIC)
    }
}

#[derive(Debug)]
pub struct MethodSlot {
    pub key: MemberKey,
    pub access_flags: MethodAccessFlags,
    new_name: OnceLock<UnqualifiedName>,
    super_method: OnceLock<Option<MethodRef>>,
}

impl MethodSlot {
    pub fn new_name(&self) -> Option<&UnqualifiedName> {
        self.new_name.get()
    }

    pub fn final_name(&self) -> &UnqualifiedName {
        self.new_name().unwrap_or(&self.key.name)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNTHETIC)
    }

    /// Constructor or static initializer
    pub fn is_special(&self) -> bool {
        self.key.name.is_special()
    }

    pub fn is_main(&self) -> bool {
        self.key.name == UnqualifiedName::MAIN && self.key.descriptor == "([Ljava/lang/String;)V"
    }
}

/// One class of the hierarchy
#[derive(Debug)]
pub struct HierarchyNode {
    pub name: BinaryName,
    pub access_flags: ClassAccessFlags,
    pub is_external: bool,
    pub superclass: Option<NodeId>,
    pub interfaces: Vec<NodeId>,

    /// Classes that extend or implement this one
    pub subclasses: Vec<NodeId>,

    pub fields: IndexMap<MemberKey, FieldSlot>,
    pub methods: IndexMap<MemberKey, MethodSlot>,
    new_name: OnceLock<BinaryName>,
}

impl HierarchyNode {
    fn new(class: &ClassEntity, superclass: Option<NodeId>, interfaces: Vec<NodeId>) -> Self {
        let fields = class
            .fields
            .iter()
            .map(|field| {
                let slot = FieldSlot {
                    key: field.key(),
                    access_flags: field.access_flags,
                    new_name: OnceLock::new(),
                };
                (slot.key.clone(), slot)
            })
            .collect();
        let methods = class
            .methods
            .iter()
            .map(|method| {
                let slot = MethodSlot {
                    key: method.key(),
                    access_flags: method.access_flags,
                    new_name: OnceLock::new(),
                    super_method: OnceLock::new(),
                };
                (slot.key.clone(), slot)
            })
            .collect();
        HierarchyNode {
            name: class.name.clone(),
            access_flags: class.access_flags,
            is_external: class.is_external(),
            superclass,
            interfaces,
            subclasses: vec![],
            fields,
            methods,
            new_name: OnceLock::new(),
        }
    }

    /// Superclass, then interfaces in declaration order
    pub fn parents(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.superclass.iter().chain(self.interfaces.iter()).copied()
    }

    pub fn new_name(&self) -> Option<&BinaryName> {
        self.new_name.get()
    }

    pub fn final_name(&self) -> &BinaryName {
        self.new_name().unwrap_or(&self.name)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_enum(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ENUM)
    }

    pub fn is_annotation(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ANNOTATION)
    }

    pub fn has_native_method(&self) -> bool {
        self.methods.values().any(MethodSlot::is_native)
    }

    pub fn has_main_method(&self) -> bool {
        self.methods.values().any(MethodSlot::is_main)
    }
}

pub struct ClassHierarchy {
    nodes: Vec<HierarchyNode>,
    by_name: HashMap<BinaryName, NodeId>,

    /// Target and synthetic classes, in repository order
    program: IndexSet<NodeId>,

    /// Override closures, shared by every member of a closure
    closures: DashMap<MethodRef, Arc<[MethodRef]>>,
}

struct HierarchyBuilder<'r> {
    repository: &'r ClassRepository,
    hierarchy: ClassHierarchy,
    in_progress: HashSet<BinaryName>,
}

impl<'r> HierarchyBuilder<'r> {
    fn visit(&mut self, name: &str, needed_by: &str) -> Result<NodeId> {
        if let Some(id) = self.hierarchy.by_name.get(name) {
            return Ok(*id);
        }

        let repository = self.repository;
        let class = repository.resolve_required(name, needed_by)?;
        if !self.in_progress.insert(class.name.clone()) {
            return Err(Error::HierarchyCycle(name.to_owned()));
        }

        let superclass = match &class.superclass {
            Some(superclass) => Some(self.visit(superclass.as_str(), name)?),
            None => None,
        };
        let mut interfaces: Vec<NodeId> = Vec::with_capacity(class.interfaces.len());
        for interface in &class.interfaces {
            let interface = self.visit(interface.as_str(), name)?;
            if !interfaces.contains(&interface) {
                interfaces.push(interface);
            }
        }

        let id = NodeId(self.hierarchy.nodes.len() as u32);
        let node = HierarchyNode::new(class, superclass, interfaces);
        for parent in node.parents() {
            self.hierarchy.nodes[parent.0 as usize].subclasses.push(id);
        }
        self.hierarchy.nodes.push(node);
        self.hierarchy.by_name.insert(class.name.clone(), id);
        self.in_progress.remove(&class.name);
        Ok(id)
    }
}

impl ClassHierarchy {
    /// Build the hierarchy of every program class and all of their ancestors
    ///
    /// Any ancestor that cannot be resolved aborts the build: renaming decisions made against a
    /// partial hierarchy would not be sound.
    pub fn build(repository: &ClassRepository) -> Result<ClassHierarchy> {
        let mut builder = HierarchyBuilder {
            repository,
            hierarchy: ClassHierarchy {
                nodes: vec![],
                by_name: HashMap::new(),
                program: IndexSet::new(),
                closures: DashMap::new(),
            },
            in_progress: HashSet::new(),
        };
        for class in repository.program_classes() {
            let name = class.name.as_str();
            let id = builder.visit(name, name)?;
            builder.hierarchy.program.insert(id);
        }
        let hierarchy = builder.hierarchy;
        log::debug!(
            "Class hierarchy has {} nodes ({} program classes)",
            hierarchy.nodes.len(),
            hierarchy.program.len()
        );
        Ok(hierarchy)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &HierarchyNode {
        &self.nodes[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &HierarchyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx as u32), node))
    }

    /// Target and synthetic classes, in repository order
    pub fn program_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.program.iter().copied()
    }

    pub fn field(&self, field: FieldRef) -> &FieldSlot {
        &self.node(field.node).fields[field.index]
    }

    pub fn method(&self, method: MethodRef) -> &MethodSlot {
        &self.node(method.node).methods[method.index]
    }

    pub fn fields_of(&self, id: NodeId) -> impl Iterator<Item = FieldRef> {
        (0..self.node(id).fields.len()).map(move |index| FieldRef { node: id, index })
    }

    pub fn methods_of(&self, id: NodeId) -> impl Iterator<Item = MethodRef> {
        (0..self.node(id).methods.len()).map(move |index| MethodRef { node: id, index })
    }

    pub fn get_field(&self, id: NodeId, key: &MemberKey) -> Option<FieldRef> {
        let index = self.node(id).fields.get_index_of(key)?;
        Some(FieldRef { node: id, index })
    }

    pub fn get_method(&self, id: NodeId, key: &MemberKey) -> Option<MethodRef> {
        let index = self.node(id).methods.get_index_of(key)?;
        Some(MethodRef { node: id, index })
    }

    /// Find a field on the class or, failing that, on its ancestors
    ///
    /// Ancestors are searched depth-first, superclass before interfaces, and the first match wins.
    pub fn search_field(&self, id: NodeId, key: &MemberKey) -> Option<FieldRef> {
        self.get_field(id, key).or_else(|| {
            self.node(id)
                .parents()
                .find_map(|parent| self.search_field(parent, key))
        })
    }

    /// Find a method on the class or, failing that, on its ancestors
    ///
    /// Same search order as [`ClassHierarchy::search_field`].
    pub fn search_method(&self, id: NodeId, key: &MemberKey) -> Option<MethodRef> {
        self.get_method(id, key).or_else(|| {
            self.node(id)
                .parents()
                .find_map(|parent| self.search_method(parent, key))
        })
    }

    /// Nearest method with the same identity in an ancestor (the method this one overrides)
    pub fn super_method(&self, method: MethodRef) -> Option<MethodRef> {
        let slot = self.method(method);
        *slot.super_method.get_or_init(|| {
            self.node(method.node)
                .parents()
                .find_map(|parent| self.search_method(parent, &slot.key))
        })
    }

    /// Find an abstract method by name alone on the class or its ancestors
    pub fn search_abstract_method(&self, id: NodeId, name: &str) -> Option<MethodRef> {
        let node = self.node(id);
        let local = node
            .methods
            .values()
            .position(|slot| slot.is_abstract() && slot.key.name.as_str() == name);
        match local {
            Some(index) => Some(MethodRef { node: id, index }),
            None => node
                .parents()
                .find_map(|parent| self.search_abstract_method(parent, name)),
        }
    }

    /// Every method that must share a name with the given one
    ///
    /// Starting from the method's class, superclasses, interfaces, and subclasses are visited
    /// transitively, and every method with the same name and descriptor is collected. The result
    /// is sorted, includes the starting method, and is the same for every one of its members.
    pub fn override_closure(&self, method: MethodRef) -> Arc<[MethodRef]> {
        if let Some(closure) = self.closures.get(&method) {
            return closure.clone();
        }

        let key = &self.method(method).key;
        let mut visited = vec![false; self.nodes.len()];
        let mut to_visit = vec![method.node];
        let mut members = vec![];
        while let Some(id) = to_visit.pop() {
            if std::mem::replace(&mut visited[id.0 as usize], true) {
                continue;
            }
            if let Some(found) = self.get_method(id, key) {
                members.push(found);
            }
            let node = self.node(id);
            to_visit.extend(node.parents());
            to_visit.extend(node.subclasses.iter().copied());
        }
        members.sort_unstable();

        let closure: Arc<[MethodRef]> = members.into();
        for member in closure.iter() {
            self.closures
                .entry(*member)
                .or_insert_with(|| closure.clone());
        }
        closure
    }

    /// Compute the override closures of many methods in parallel
    pub fn override_closures(&self, methods: &[MethodRef]) -> Vec<Arc<[MethodRef]>> {
        methods
            .par_iter()
            .map(|method| self.override_closure(*method))
            .collect()
    }

    pub fn assign_class_name(&self, id: NodeId, new_name: BinaryName) -> Result<()> {
        let node = self.node(id);
        node.new_name
            .set(new_name)
            .map_err(|_| Error::DuplicateRename(node.name.as_str().to_owned()))
    }

    pub fn assign_field_name(&self, field: FieldRef, new_name: UnqualifiedName) -> Result<()> {
        self.field(field).new_name.set(new_name).map_err(|_| {
            let owner = &self.node(field.node).name;
            Error::DuplicateRename(format!("{}.{}", owner, self.field(field).key))
        })
    }

    pub fn assign_method_name(&self, method: MethodRef, new_name: UnqualifiedName) -> Result<()> {
        self.method(method).new_name.set(new_name).map_err(|_| {
            let owner = &self.node(method.node).name;
            Error::DuplicateRename(format!("{}.{}", owner, self.method(method).key))
        })
    }

    /// Decided new name of a program class, if it has one
    pub fn mapped_class_name(&self, name: &str) -> Option<&BinaryName> {
        let node = self.node(self.lookup(name)?);
        if node.is_external {
            return None;
        }
        node.new_name()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::model::{ClassOrigin, MethodEntity};
    use crate::jvm::{MethodDescriptor, RenderDescriptor};

    pub(crate) fn class(
        name: &str,
        superclass: Option<&str>,
        interfaces: &[&str],
        flags: ClassAccessFlags,
        methods: &[&str],
    ) -> ClassEntity {
        let binary = |s: &str| BinaryName::from_string(s.to_owned()).unwrap();
        let origin = ClassOrigin::Target {
            entry: format!("{}.class", name),
        };
        let mut class = ClassEntity::new(binary(name), superclass.map(binary), flags, origin);
        class.interfaces = interfaces.iter().map(|name| binary(name)).collect();
        for method in methods {
            let method_flags = if flags.contains(ClassAccessFlags::INTERFACE) {
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT
            } else {
                MethodAccessFlags::PUBLIC
            };
            class
                .add_method(MethodEntity::new(
                    method_flags,
                    UnqualifiedName::from_string((*method).to_owned()).unwrap(),
                    MethodDescriptor {
                        parameters: vec![],
                        return_type: None,
                    },
                ))
                .unwrap();
        }
        class
    }

    fn object() -> ClassEntity {
        let mut object = class("java/lang/Object", None, &[], ClassAccessFlags::PUBLIC, &[]);
        object.origin = ClassOrigin::External {
            source: String::from("rt"),
        };
        object
    }

    fn key(name: &str) -> MemberKey {
        let descriptor = MethodDescriptor::<BinaryName> {
            parameters: vec![],
            return_type: None,
        };
        MemberKey::new(
            UnqualifiedName::from_string(name.to_owned()).unwrap(),
            descriptor.render(),
        )
    }

    /// `I { m }`, `J extends I { m }`, `A implements I { m }`, `B extends A implements J { m }`
    fn diamond() -> ClassRepository {
        let mut repository = ClassRepository::default();
        repository.external.insert(object());
        let interface = ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE;
        let object = Some("java/lang/Object");
        for class in [
            self::class("d/B", Some("d/A"), &["d/J"], ClassAccessFlags::PUBLIC, &["m"]),
            self::class("d/A", object, &["d/I"], ClassAccessFlags::PUBLIC, &["m", "solo"]),
            self::class("d/J", object, &["d/I"], interface, &["m"]),
            self::class("d/I", object, &[], interface, &["m"]),
        ] {
            repository.target.insert(class);
        }
        repository
    }

    #[test]
    fn shared_nodes() {
        let repository = diamond();
        let hierarchy = ClassHierarchy::build(&repository).unwrap();
        assert_eq!(hierarchy.len(), 5);

        let i = hierarchy.lookup("d/I").unwrap();
        let mut implementers: Vec<&str> = hierarchy
            .node(i)
            .subclasses
            .iter()
            .map(|id| hierarchy.node(*id).name.as_str())
            .collect();
        implementers.sort();
        assert_eq!(implementers, vec!["d/A", "d/J"]);

        let program: Vec<&str> = hierarchy
            .program_nodes()
            .map(|id| hierarchy.node(id).name.as_str())
            .collect();
        assert_eq!(program, vec!["d/B", "d/A", "d/J", "d/I"]);
        assert!(hierarchy.node(hierarchy.lookup("java/lang/Object").unwrap()).is_external);
    }

    #[test]
    fn search_prefers_superclass() {
        let repository = diamond();
        let hierarchy = ClassHierarchy::build(&repository).unwrap();
        let b = hierarchy.lookup("d/B").unwrap();
        let a = hierarchy.lookup("d/A").unwrap();

        let solo = hierarchy.search_method(b, &key("solo")).unwrap();
        assert_eq!(solo.node, a);
        assert!(hierarchy.search_method(b, &key("missing")).is_none());

        let m = hierarchy.get_method(b, &key("m")).unwrap();
        let overridden = hierarchy.super_method(m).unwrap();
        assert_eq!(overridden.node, a);
        assert_eq!(hierarchy.super_method(m), Some(overridden));

        let i = hierarchy.lookup("d/I").unwrap();
        let top = hierarchy.get_method(i, &key("m")).unwrap();
        assert_eq!(hierarchy.super_method(top), None);
        let abstract_m = hierarchy.search_abstract_method(b, "m").unwrap();
        assert_eq!(abstract_m.node, i);
    }

    #[test]
    fn closures_are_symmetric() {
        let repository = diamond();
        let hierarchy = ClassHierarchy::build(&repository).unwrap();
        let starts: Vec<MethodRef> = ["d/B", "d/A", "d/J", "d/I"]
            .iter()
            .map(|name| {
                let id = hierarchy.lookup(name).unwrap();
                hierarchy.get_method(id, &key("m")).unwrap()
            })
            .collect();

        let closures = hierarchy.override_closures(&starts);
        for (start, closure) in starts.iter().zip(&closures) {
            assert_eq!(closure.len(), 4);
            assert!(closure.contains(start));
            assert_eq!(closure, &closures[0]);
        }
    }

    #[test]
    fn renames_are_assigned_once() {
        let repository = diamond();
        let hierarchy = ClassHierarchy::build(&repository).unwrap();
        let a = hierarchy.lookup("d/A").unwrap();
        let new_name = BinaryName::from_string("x/Y".to_owned()).unwrap();
        hierarchy.assign_class_name(a, new_name.clone()).unwrap();
        assert_eq!(hierarchy.mapped_class_name("d/A"), Some(&new_name));
        assert!(matches!(
            hierarchy.assign_class_name(a, new_name),
            Err(Error::DuplicateRename(_))
        ));
        assert_eq!(hierarchy.mapped_class_name("java/lang/Object"), None);
    }

    #[test]
    fn missing_ancestor_is_fatal() {
        let mut repository = ClassRepository::default();
        repository.target.insert(class(
            "d/Orphan",
            Some("d/Gone"),
            &[],
            ClassAccessFlags::PUBLIC,
            &[],
        ));
        match ClassHierarchy::build(&repository) {
            Err(Error::ClassNotFound { name, needed_by }) => {
                assert_eq!(name, "d/Gone");
                assert_eq!(needed_by, "d/Orphan");
            }
            _ => panic!("expected a missing class"),
        }
    }

    #[test]
    fn cycles_are_fatal() {
        let mut repository = ClassRepository::default();
        repository.target.insert(class("c/A", Some("c/B"), &[], ClassAccessFlags::PUBLIC, &[]));
        repository.target.insert(class("c/B", Some("c/A"), &[], ClassAccessFlags::PUBLIC, &[]));
        assert!(matches!(
            ClassHierarchy::build(&repository),
            Err(Error::HierarchyCycle(_))
        ));
    }
}
