use crate::rename::{Dictionaries, RenameSettings, RenamingEngine};
use crate::transform::{TransformContext, Transformer};
use crate::Result;

/// Renames classes, fields, and methods across the whole program
pub struct NameObfuscation {
    settings: RenameSettings,
}

impl NameObfuscation {
    pub const NAME: &'static str = "NameObfuscation";

    pub fn new(settings: RenameSettings) -> NameObfuscation {
        NameObfuscation { settings }
    }
}

impl Transformer for NameObfuscation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, context: &mut TransformContext) -> Result<()> {
        let dictionaries = Dictionaries {
            classes: context.new_dictionary()?,
            fields: context.new_dictionary()?,
            methods: context.new_dictionary()?,
        };
        let assignment =
            RenamingEngine::new(&self.settings, dictionaries).run(&mut context.repository)?;
        context.artifacts.rename_assignment = Some(assignment);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DictionarySetting;
    use crate::jvm::model::{ClassEntity, ClassOrigin};
    use crate::jvm::{BinaryName, ClassAccessFlags, Name};
    use crate::repository::ClassRepository;

    #[test]
    fn assignment_is_shared() {
        let mut repository = ClassRepository::default();
        repository.external.insert(ClassEntity::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        ));
        repository.target.insert(ClassEntity::new(
            BinaryName::from_string(String::from("app/Widget")).unwrap(),
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Target {
                entry: String::from("app/Widget.class"),
            },
        ));
        let mut context = TransformContext::new(repository, DictionarySetting::default(), Some(3));

        let settings = RenameSettings {
            mapping_path: None,
            ..RenameSettings::default()
        };
        NameObfuscation::new(settings).run(&mut context).unwrap();

        let assignment = context.artifacts.rename_assignment.as_ref().unwrap();
        let new_name = assignment.class_name("app/Widget").unwrap();
        assert!(context.repository.target.get(new_name.as_str()).is_some());
        assert!(context.repository.target.get("app/Widget").is_none());
    }
}
