use crate::archive::ArchiveEntry;
use crate::jvm::class_file::read_class;
use crate::jvm::model::{ClassEntity, ClassOrigin};
use crate::jvm::{BinaryName, Name};
use crate::pattern::ClassFilter;
use crate::repository::ExternalClasses;
use crate::{Error, Result};
use indexmap::IndexMap;

/// Classes of the input archive that get transformed, plus its other entries
///
/// Iteration follows the order of the input archive, so output is deterministic.
#[derive(Default)]
pub struct TargetClasses {
    classes: IndexMap<BinaryName, ClassEntity>,
    resources: Vec<ArchiveEntry>,
}

impl TargetClasses {
    pub fn new() -> TargetClasses {
        TargetClasses::default()
    }

    /// Sort the entries of the input archive
    ///
    /// Classes matching `skip` are dropped entirely. Classes matching `library` are handed to
    /// `external` and otherwise kept untouched, like any non-class entry.
    pub fn load(
        entries: Vec<ArchiveEntry>,
        skip: &ClassFilter,
        library: &ClassFilter,
        external: &ExternalClasses,
    ) -> Result<TargetClasses> {
        let mut target = TargetClasses::new();
        for entry in entries {
            let class_name = match entry.name.strip_suffix(".class") {
                Some(class_name) if !class_name.ends_with("module-info") => class_name,
                _ => {
                    target.resources.push(entry);
                    continue;
                }
            };

            if skip.matches(class_name) {
                log::debug!("Skipping {}", entry.name);
                continue;
            }

            if library.matches(class_name) {
                let origin = ClassOrigin::External {
                    source: entry.name.clone(),
                };
                external.insert(read_class(&entry.data, origin)?);
                target.resources.push(entry);
                continue;
            }

            let origin = ClassOrigin::Target {
                entry: entry.name.clone(),
            };
            let class = read_class(&entry.data, origin)?;
            log::trace!("Loading class {}", class.name);
            if class.is_kotlin() {
                log::debug!("{} is a Kotlin class", class.name);
            }
            target.insert(class);
        }
        Ok(target)
    }

    pub fn insert(&mut self, class: ClassEntity) {
        if let Some(previous) = self.classes.insert(class.name.clone(), class) {
            log::warn!("Class {} appears more than once, keeping the last one", previous.name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassEntity> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassEntity> {
        self.classes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassEntity> {
        self.classes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClassEntity> {
        self.classes.values_mut()
    }

    /// Entries of the input archive that are not transformed
    pub fn resources(&self) -> &[ArchiveEntry] {
        &self.resources
    }

    /// Move a class to a new key without changing its position
    ///
    /// Returns `Ok(false)` if there is no class under `old`.
    pub fn rename_key(&mut self, old: &str, new: BinaryName) -> Result<bool> {
        rename_key(&mut self.classes, old, new)
    }
}

/// Re-key an entry of an ordered map in place
pub(crate) fn rename_key(
    classes: &mut IndexMap<BinaryName, ClassEntity>,
    old: &str,
    new: BinaryName,
) -> Result<bool> {
    if old == new.as_str() {
        return Ok(classes.contains_key(old));
    }
    if classes.contains_key(new.as_str()) {
        return Err(Error::DuplicateRename(new.as_str().to_owned()));
    }
    let (idx, _, class) = match classes.swap_remove_full(old) {
        Some(removed) => removed,
        None => return Ok(false),
    };
    let (last, _) = classes.insert_full(new, class);
    classes.swap_indices(idx, last);
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ClassAccessFlags;

    fn class(name: &str) -> ClassEntity {
        ClassEntity::new(
            BinaryName::from_string(name.to_owned()).unwrap(),
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        )
    }

    fn names(target: &TargetClasses) -> Vec<&str> {
        target.iter().map(|class| class.name.as_str()).collect()
    }

    #[test]
    fn rename_keeps_order() {
        let mut target = TargetClasses::new();
        for name in ["a/One", "a/Two", "a/Three"] {
            target.insert(class(name));
        }

        let renamed = BinaryName::from_string("x/A".to_owned()).unwrap();
        assert!(target.rename_key("a/One", renamed).unwrap());
        assert_eq!(names(&target), vec!["a/One", "a/Two", "a/Three"]);
        assert!(target.get("x/A").is_some());
        assert!(target.get("a/One").is_none());

        let last = BinaryName::from_string("x/C".to_owned()).unwrap();
        assert!(target.rename_key("a/Three", last).unwrap());
        let keys: Vec<&str> = target.classes.keys().map(|key| key.as_str()).collect();
        assert_eq!(keys, vec!["x/A", "a/Two", "x/C"]);

        let missing = BinaryName::from_string("x/D".to_owned()).unwrap();
        assert!(!target.rename_key("a/Missing", missing).unwrap());

        let taken = BinaryName::from_string("x/A".to_owned()).unwrap();
        assert!(matches!(
            target.rename_key("a/Two", taken),
            Err(Error::DuplicateRename(_))
        ));
    }
}
