use crate::jvm::model::{ClassEntity, ClassOrigin};
use crate::jvm::BinaryName;
use crate::Result;
use indexmap::IndexMap;

/// Classes generated by transformations
///
/// They are transformed and written out just like the classes of the input archive.
#[derive(Default)]
pub struct SyntheticClasses {
    classes: IndexMap<BinaryName, ClassEntity>,
}

impl SyntheticClasses {
    pub fn new() -> SyntheticClasses {
        SyntheticClasses::default()
    }

    pub fn insert(&mut self, mut class: ClassEntity) {
        class.origin = ClassOrigin::Synthetic;
        if let Some(previous) = self.classes.insert(class.name.clone(), class) {
            log::warn!("Synthetic class {} was generated twice", previous.name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassEntity> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassEntity> {
        self.classes.get_mut(name)
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

    pub fn rename_key(&mut self, old: &str, new: BinaryName) -> Result<bool> {
        super::target::rename_key(&mut self.classes, old, new)
    }
}
