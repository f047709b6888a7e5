use crate::config::DictionarySetting;
use crate::jvm::model::ClassEntity;
use crate::jvm::Name;
use crate::rename::{Dictionary, RenameAssignment};
use crate::repository::ClassRepository;
use crate::Result;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Results of earlier transformers that later ones (and the caller) can read
#[derive(Default, Debug)]
pub struct SharedArtifacts {
    /// Names decided by the last renaming pass
    pub rename_assignment: Option<RenameAssignment>,
}

/// Everything a transformer works against
pub struct TransformContext {
    pub repository: ClassRepository,
    pub dictionary: DictionarySetting,
    pub rng: SmallRng,
    pub artifacts: SharedArtifacts,
}

impl TransformContext {
    /// Without a seed, randomness comes from the operating system
    pub fn new(
        repository: ClassRepository,
        dictionary: DictionarySetting,
        seed: Option<u64>,
    ) -> TransformContext {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        TransformContext {
            repository,
            dictionary,
            rng,
            artifacts: SharedArtifacts::default(),
        }
    }

    /// Name generator over the configured dictionary, seeded from the context's generator
    pub fn new_dictionary(&mut self) -> Result<Dictionary> {
        let rng = SmallRng::from_rng(&mut self.rng);
        self.dictionary.build(rng)
    }

    pub fn into_repository(self) -> ClassRepository {
        self.repository
    }
}

/// Name generator for members added to `class`
///
/// Names the class already uses for fields or methods are never handed out.
pub fn member_dictionary(
    setting: &DictionarySetting,
    rng: &mut SmallRng,
    class: &ClassEntity,
) -> Result<Dictionary> {
    let mut dictionary = setting.build(SmallRng::from_rng(rng))?;
    dictionary.add_blacklist(class.fields.iter().map(|field| field.name.as_str()));
    dictionary.add_blacklist(class.methods.iter().map(|method| method.name.as_str()));
    Ok(dictionary)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seeded_dictionaries_repeat() {
        let names = |seed| {
            let mut context =
                TransformContext::new(ClassRepository::default(), DictionarySetting::default(), seed);
            let mut first = context.new_dictionary().unwrap();
            let mut second = context.new_dictionary().unwrap();
            (0..10)
                .map(|_| (first.next_name(), second.next_name()))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(Some(7)), names(Some(7)));
        assert_ne!(names(Some(7)), names(Some(8)));
    }
}
