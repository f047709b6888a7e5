//! Class lookup across every source of classes
//!
//! A name resolves against three sources, always in the same order:
//!
//!   1. [`TargetClasses`], loaded eagerly from the input archive
//!   2. [`SyntheticClasses`], generated by transformations
//!   3. [`ExternalClasses`], loaded lazily from library jars and platform modules
//!
//! Array descriptors (`[I`, `[Ljava/lang/String;`) never resolve: they are opaque as far as the
//! class hierarchy is concerned.

mod external;
mod synthetic;
mod target;

pub use external::*;
pub use synthetic::*;
pub use target::*;

use crate::jvm::model::ClassEntity;
use crate::jvm::verifier::TypeHierarchy;
use crate::jvm::{BinaryName, Name};
use crate::{Error, Result};
use std::collections::HashMap;

#[derive(Default)]
pub struct ClassRepository {
    pub target: TargetClasses,
    pub synthetic: SyntheticClasses,
    pub external: ExternalClasses,
}

impl ClassRepository {
    pub fn new(target: TargetClasses, external: ExternalClasses) -> ClassRepository {
        ClassRepository {
            target,
            synthetic: SyntheticClasses::new(),
            external,
        }
    }

    pub fn is_array_name(name: &str) -> bool {
        name.starts_with('[')
    }

    /// Look up a class, surfacing failures to load a library class
    pub fn try_resolve(&self, name: &str) -> Result<Option<&ClassEntity>> {
        if Self::is_array_name(name) {
            return Ok(None);
        }
        if let Some(class) = self.target.get(name) {
            return Ok(Some(class));
        }
        if let Some(class) = self.synthetic.get(name) {
            return Ok(Some(class));
        }
        match BinaryName::from_string(name.to_owned()) {
            Ok(binary_name) => self.external.resolve(&binary_name),
            Err(_) => Ok(None),
        }
    }

    /// Look up a class
    ///
    /// A library class that fails to load is logged and treated as missing.
    pub fn resolve(&self, name: &str) -> Option<&ClassEntity> {
        match self.try_resolve(name) {
            Ok(found) => found,
            Err(err) => {
                log::warn!("Failed to load {}: {}", name, err);
                None
            }
        }
    }

    /// Look up a class that has to exist
    pub fn resolve_required(&self, name: &str, needed_by: &str) -> Result<&ClassEntity> {
        self.try_resolve(name)?.ok_or_else(|| Error::ClassNotFound {
            name: name.to_owned(),
            needed_by: needed_by.to_owned(),
        })
    }

    /// Classes that get transformed and written out (target, then synthetic)
    pub fn program_classes(&self) -> impl Iterator<Item = &ClassEntity> {
        self.target.iter().chain(self.synthetic.iter())
    }

    pub fn program_classes_mut(&mut self) -> impl Iterator<Item = &mut ClassEntity> {
        self.target.iter_mut().chain(self.synthetic.iter_mut())
    }

    /// Split into a frozen view of the class hierarchy and the program classes, for verification
    ///
    /// The view records superclasses of program classes as they are now, so the classes
    /// themselves can be edited while it is in use.
    pub fn hierarchy_and_program_classes(
        &mut self,
    ) -> (
        HierarchySnapshot<'_>,
        impl Iterator<Item = &mut ClassEntity>,
    ) {
        let ClassRepository {
            target,
            synthetic,
            external,
        } = self;
        let program = target
            .iter()
            .chain(synthetic.iter())
            .map(|class| (class.name.clone(), hierarchy_info(class)))
            .collect();
        let snapshot = HierarchySnapshot { program, external };
        (snapshot, target.iter_mut().chain(synthetic.iter_mut()))
    }

    /// Re-key a renamed program class so later lookups find it under its new name
    pub fn rename_key(&mut self, old: &str, new: BinaryName) -> Result<bool> {
        if self.target.contains(old) {
            self.target.rename_key(old, new)
        } else {
            self.synthetic.rename_key(old, new)
        }
    }
}

fn hierarchy_info(class: &ClassEntity) -> (Option<BinaryName>, bool) {
    (class.superclass.clone(), class.is_interface())
}

impl TypeHierarchy for ClassRepository {
    fn class_info(&self, name: &BinaryName) -> Option<(Option<BinaryName>, bool)> {
        self.resolve(name.as_str()).map(hierarchy_info)
    }
}

/// See [`ClassRepository::hierarchy_and_program_classes`]
pub struct HierarchySnapshot<'a> {
    program: HashMap<BinaryName, (Option<BinaryName>, bool)>,
    external: &'a ExternalClasses,
}

impl TypeHierarchy for HierarchySnapshot<'_> {
    fn class_info(&self, name: &BinaryName) -> Option<(Option<BinaryName>, bool)> {
        if let Some(info) = self.program.get(name) {
            return Some(info.clone());
        }
        match self.external.resolve(name) {
            Ok(found) => found.map(hierarchy_info),
            Err(err) => {
                log::warn!("Failed to load {}: {}", name.as_str(), err);
                None
            }
        }
    }
}
