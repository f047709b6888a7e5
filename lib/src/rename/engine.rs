use crate::hierarchy::{ClassHierarchy, FieldSlot, HierarchyNode, MethodRef, MethodSlot, NodeId};
use crate::jvm::model::MemberKey;
use crate::jvm::{BinaryName, Name, UnqualifiedName};
use crate::repository::ClassRepository;
use crate::rename::{
    remap_class, render_mapping, Dictionary, ExclusionRules, HierarchyRemapper, RenameSettings,
};
use crate::{Error, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

/// One renamed field or method
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MemberRename {
    /// Original identity
    pub key: MemberKey,
    pub new_name: UnqualifiedName,
}

/// Every decision of a renaming pass, keyed by original class names
#[derive(Clone, Default, Debug)]
pub struct RenameAssignment {
    classes: IndexMap<BinaryName, BinaryName>,
    fields: IndexMap<BinaryName, Vec<MemberRename>>,
    methods: IndexMap<BinaryName, Vec<MemberRename>>,
}

impl RenameAssignment {
    /// Gather the decisions recorded on the program classes of a hierarchy
    pub fn collect(hierarchy: &ClassHierarchy) -> RenameAssignment {
        let mut assignment = RenameAssignment::default();
        for id in hierarchy.program_nodes() {
            let node = hierarchy.node(id);
            if let Some(new_name) = node.new_name() {
                assignment.classes.insert(node.name.clone(), new_name.clone());
            }
            let fields: Vec<MemberRename> = node
                .fields
                .values()
                .filter_map(|slot| {
                    Some(MemberRename {
                        key: slot.key.clone(),
                        new_name: slot.new_name()?.clone(),
                    })
                })
                .collect();
            if !fields.is_empty() {
                assignment.fields.insert(node.name.clone(), fields);
            }
            let methods: Vec<MemberRename> = node
                .methods
                .values()
                .filter_map(|slot| {
                    Some(MemberRename {
                        key: slot.key.clone(),
                        new_name: slot.new_name()?.clone(),
                    })
                })
                .collect();
            if !methods.is_empty() {
                assignment.methods.insert(node.name.clone(), methods);
            }
        }
        assignment
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }

    /// Renamed classes, as `(original, new)` pairs
    pub fn classes(&self) -> impl Iterator<Item = (&BinaryName, &BinaryName)> {
        self.classes.iter()
    }

    pub fn class_name(&self, original: &str) -> Option<&BinaryName> {
        self.classes.get(original)
    }

    pub fn fields_of(&self, owner: &str) -> &[MemberRename] {
        self.fields.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn methods_of(&self, owner: &str) -> &[MemberRename] {
        self.methods.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field_name(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<&UnqualifiedName> {
        find_member(self.fields_of(owner), name, descriptor)
    }

    pub fn method_name(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<&UnqualifiedName> {
        find_member(self.methods_of(owner), name, descriptor)
    }

    /// Classes that were renamed or have renamed members, in program order
    pub fn touched_classes(&self) -> Vec<&BinaryName> {
        let mut touched: Vec<&BinaryName> = self.classes.keys().collect();
        for owner in self.fields.keys().chain(self.methods.keys()) {
            if !touched.contains(&owner) {
                touched.push(owner);
            }
        }
        touched
    }

    /// Number of renamed classes, fields, and methods
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.classes.len(),
            self.fields.values().map(Vec::len).sum(),
            self.methods.values().map(Vec::len).sum(),
        )
    }
}

fn find_member<'a>(
    members: &'a [MemberRename],
    name: &str,
    descriptor: &str,
) -> Option<&'a UnqualifiedName> {
    members
        .iter()
        .find(|member| member.key.name.as_str() == name && member.key.descriptor == descriptor)
        .map(|member| &member.new_name)
}

/// Name generators for one pass
pub struct Dictionaries {
    pub classes: Dictionary,
    pub fields: Dictionary,
    pub methods: Dictionary,
}

/// Whole-program renaming
///
/// A pass goes through four phases, in order:
///
///   1. build the class hierarchy of the program classes
///   2. decide new names for classes, fields, and methods
///   3. write the mapping report
///   4. rewrite every program class and re-key the renamed ones
///
/// No class is touched before every decision has been made, since descriptors anywhere in the
/// program embed class names decided anywhere else.
pub struct RenamingEngine<'s> {
    settings: &'s RenameSettings,
    exclusions: ExclusionRules,
    dictionaries: Dictionaries,
}

impl<'s> RenamingEngine<'s> {
    pub fn new(settings: &'s RenameSettings, dictionaries: Dictionaries) -> RenamingEngine<'s> {
        RenamingEngine {
            settings,
            exclusions: ExclusionRules::new(&settings.exclude),
            dictionaries,
        }
    }

    pub fn run(self, repository: &mut ClassRepository) -> Result<RenameAssignment> {
        log::info!("Building class hierarchy");
        let hierarchy = ClassHierarchy::build(repository)?;

        log::info!("Deciding names");
        let settings = self.settings;
        let mut decider = Decider::new(&hierarchy, settings, self.exclusions, self.dictionaries);
        if settings.rename_class {
            decider.decide_classes()?;
        }
        if settings.rename_field {
            decider.decide_fields()?;
        }
        if settings.rename_method {
            decider.decide_methods()?;
        }
        let assignment = RenameAssignment::collect(&hierarchy);
        let (classes, fields, methods) = assignment.counts();
        log::info!(
            "Renaming {} classes, {} fields, and {} methods",
            classes,
            fields,
            methods
        );

        let remapper = HierarchyRemapper::new(&hierarchy);
        if let Some(path) = &settings.mapping_path {
            log::info!("Writing mapping to {}", path.display());
            fs::write(path, render_mapping(&assignment, &remapper))?;
        }

        log::info!("Rewriting classes");
        for class in repository.program_classes_mut() {
            remap_class(class, &remapper);
        }
        for (original, new_name) in assignment.classes() {
            log::debug!("Renamed class {} to {}", original, new_name);
            repository.rename_key(original.as_str(), new_name.clone())?;
        }
        Ok(assignment)
    }
}

/// Decision phase state
///
/// Name generation is sequential; only override closures are computed in parallel.
struct Decider<'h> {
    hierarchy: &'h ClassHierarchy,
    settings: &'h RenameSettings,
    exclusions: ExclusionRules,
    dictionaries: Dictionaries,

    /// Class names that exist or have been handed out
    taken_classes: HashSet<String>,
}

impl<'h> Decider<'h> {
    fn new(
        hierarchy: &'h ClassHierarchy,
        settings: &'h RenameSettings,
        exclusions: ExclusionRules,
        mut dictionaries: Dictionaries,
    ) -> Decider<'h> {
        let mut taken_classes = HashSet::new();
        for (_, node) in hierarchy.nodes() {
            taken_classes.insert(node.name.as_str().to_owned());
            dictionaries
                .fields
                .add_blacklist(node.fields.keys().map(|key| key.name.as_str()));
            dictionaries
                .methods
                .add_blacklist(node.methods.keys().map(|key| key.name.as_str()));
        }
        Decider {
            hierarchy,
            settings,
            exclusions,
            dictionaries,
            taken_classes,
        }
    }

    fn can_rename_class(&self, node: &HierarchyNode) -> bool {
        !node.is_external
            && !node.has_native_method()
            && (self.settings.rename_main || !node.has_main_method())
            && !self.exclusions.excludes_class(node.name.as_str())
    }

    fn decide_classes(&mut self) -> Result<()> {
        let program: Vec<NodeId> = self.hierarchy.program_nodes().collect();
        for id in program {
            self.decide_class(id)?;
        }
        Ok(())
    }

    fn decide_class(&mut self, id: NodeId) -> Result<()> {
        let hierarchy = self.hierarchy;
        let settings = self.settings;
        let node = hierarchy.node(id);
        if node.new_name().is_some() || !self.can_rename_class(node) {
            return Ok(());
        }

        let new_name = match node.name.split_nested() {
            Some((outer, inner)) => {
                let outer_name = match hierarchy.lookup(outer.as_str()) {
                    Some(outer_id) => {
                        self.decide_class(outer_id)?;
                        hierarchy.node(outer_id).final_name().clone()
                    }
                    None => outer,
                };

                // Anonymous class ordinals are kept
                let candidate = if inner.bytes().all(|b| b.is_ascii_digit()) {
                    Some(outer_name.nested(inner))
                } else {
                    None
                };
                match candidate {
                    Some(candidate) if candidate == node.name => return Ok(()),
                    Some(candidate) if !self.taken_classes.contains(candidate.as_str()) => {
                        candidate
                    }
                    _ => self.fresh_class_name(|token| outer_name.nested(token).to_string())?,
                }
            }
            None => {
                let prefix = settings
                    .package_prefix
                    .as_deref()
                    .map(|prefix| prefix.trim_end_matches('/'))
                    .filter(|prefix| !prefix.is_empty());
                self.fresh_class_name(|token| match prefix {
                    Some(prefix) => format!("{}/{}", prefix, token),
                    None => token.to_owned(),
                })?
            }
        };

        self.taken_classes.insert(new_name.as_str().to_owned());
        hierarchy.assign_class_name(id, new_name)
    }

    fn fresh_class_name(&mut self, compose: impl Fn(&str) -> String) -> Result<BinaryName> {
        loop {
            let name = compose(&self.dictionaries.classes.next_name());
            if !self.taken_classes.contains(&name) {
                return BinaryName::from_string(name).map_err(Error::InvalidDictionary);
            }
        }
    }

    fn is_enum_field(node: &HierarchyNode, slot: &FieldSlot) -> bool {
        if !(node.is_enum() && slot.is_static() && slot.is_final()) {
            return false;
        }
        let descriptor = slot.key.descriptor.as_str();
        let constant = slot.is_public() && descriptor == format!("L{};", node.name);
        let values = slot.is_private()
            && slot.key.name == UnqualifiedName::DOLLAR_VALUES_FIELD
            && descriptor == format!("[L{};", node.name);
        constant || values
    }

    fn can_rename_field(&self, node: &HierarchyNode, slot: &FieldSlot) -> bool {
        !node.is_external
            && !slot.is_synthetic()
            && !Self::is_enum_field(node, slot)
            && !self.exclusions.excludes_field(
                node.name.as_str(),
                slot.key.name.as_str(),
                &slot.key.descriptor,
            )
    }

    fn decide_fields(&mut self) -> Result<()> {
        let hierarchy = self.hierarchy;
        for id in hierarchy.program_nodes() {
            let node = hierarchy.node(id);
            for field in hierarchy.fields_of(id) {
                let slot = hierarchy.field(field);
                if slot.new_name().is_some() || !self.can_rename_field(node, slot) {
                    continue;
                }
                let new_name = self.fresh_member_name(false)?;
                hierarchy.assign_field_name(field, new_name)?;
            }
        }
        Ok(())
    }

    fn fresh_member_name(&mut self, method: bool) -> Result<UnqualifiedName> {
        let dictionary = if method {
            &mut self.dictionaries.methods
        } else {
            &mut self.dictionaries.fields
        };
        UnqualifiedName::from_string(dictionary.next_name()).map_err(Error::InvalidDictionary)
    }

    fn is_enum_method(node: &HierarchyNode, slot: &MethodSlot) -> bool {
        if !(node.is_enum() && slot.is_public() && slot.is_static()) {
            return false;
        }
        let name = &slot.key.name;
        let descriptor = slot.key.descriptor.as_str();
        let values = (*name == UnqualifiedName::VALUES || *name == UnqualifiedName::DOLLAR_VALUES)
            && descriptor == format!("()[L{};", node.name);
        let value_of = *name == UnqualifiedName::VALUEOF
            && descriptor == format!("(Ljava/lang/String;)L{};", node.name);
        values || value_of
    }

    fn can_rename_method(&self, node: &HierarchyNode, slot: &MethodSlot) -> bool {
        !node.is_external
            && !slot.is_special()
            && !slot.is_native()
            && !slot.is_synthetic()
            && (self.settings.rename_main || !slot.is_main())
            && !Self::is_enum_method(node, slot)
            && !(node.is_annotation() && slot.key.name == UnqualifiedName::VALUE)
            && !self.exclusions.excludes_method(
                node.name.as_str(),
                slot.key.name.as_str(),
                &slot.key.descriptor,
            )
    }

    fn method_renamable(&self, method: MethodRef) -> bool {
        self.can_rename_method(self.hierarchy.node(method.node), self.hierarchy.method(method))
    }

    fn decide_methods(&mut self) -> Result<()> {
        let hierarchy = self.hierarchy;
        let candidates: Vec<MethodRef> = hierarchy
            .program_nodes()
            .flat_map(|id| hierarchy.methods_of(id))
            .filter(|method| self.method_renamable(*method))
            .collect();

        let instance: Vec<MethodRef> = candidates
            .iter()
            .copied()
            .filter(|method| !hierarchy.method(*method).is_static())
            .collect();
        let closures: HashMap<MethodRef, Arc<[MethodRef]>> = instance
            .iter()
            .copied()
            .zip(hierarchy.override_closures(&instance))
            .collect();

        for method in candidates {
            let slot = hierarchy.method(method);
            if slot.new_name().is_some() {
                continue;
            }
            let closure = match closures.get(&method) {
                Some(closure) => closure,
                None => {
                    let new_name = self.fresh_member_name(true)?;
                    hierarchy.assign_method_name(method, new_name)?;
                    continue;
                }
            };

            let renamable = closure.iter().all(|member| {
                self.method_renamable(*member)
                    && !hierarchy.method(*member).is_static()
                    && hierarchy.method(*member).new_name().is_none()
            });
            if !renamable {
                log::trace!(
                    "Keeping {}.{}: its override closure cannot be renamed",
                    hierarchy.node(method.node).name,
                    slot.key
                );
                continue;
            }

            let new_name = self.fresh_member_name(true)?;
            for member in closure.iter() {
                hierarchy.assign_method_name(*member, new_name.clone())?;
            }
        }
        Ok(())
    }
}
