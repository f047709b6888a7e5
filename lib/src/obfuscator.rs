//! The obfuscation pipeline
//!
//! A run goes through four phases:
//!
//!   1. load the input archive and open the library sources
//!   2. run every enabled transformer, in configuration order
//!   3. verify every method of every program class (computing `max_stack`, `max_locals`, and
//!      stack map frames)
//!   4. write the output archive
//!
//! Nothing is written unless the first three phases succeed, and the output archive only appears
//! once it is complete.

use crate::archive::{read_archive, ArchiveWriter};
use crate::config::Config;
use crate::jvm::class_file::write_class;
use crate::jvm::model::ClassEntity;
use crate::jvm::verifier::{verify_method, TypeHierarchy};
use crate::pattern::ClassFilter;
use crate::repository::{ClassRepository, ExternalClasses, JarSource, ModuleDirSource, TargetClasses};
use crate::transform::{SharedArtifacts, TransformContext, Transformer, TransformerRegistry};
use crate::Result;
use std::mem;
use std::path::Path;

pub struct Obfuscator {
    config: Config,
    registry: TransformerRegistry,
}

impl Obfuscator {
    pub fn new(config: Config) -> Obfuscator {
        Obfuscator::with_registry(config, TransformerRegistry::default())
    }

    pub fn with_registry(config: Config, registry: TransformerRegistry) -> Obfuscator {
        Obfuscator { config, registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline from input archive to output archive
    pub fn run(&self) -> Result<SharedArtifacts> {
        let repository = self.load()?;
        let context = self.process(repository)?;
        self.write(&context.repository, self.config.output_path()?)?;
        Ok(context.artifacts)
    }

    /// Read the input archive and set up library lookup
    pub fn load(&self) -> Result<ClassRepository> {
        let input = self.config.input_path()?;
        log::info!("Loading {}", input.display());

        let mut external = ExternalClasses::new();
        for library in &self.config.libraries {
            external.add_source(Box::new(JarSource::open(library)?));
        }
        if let Some(modules) = &self.config.platform_modules {
            external.add_source(Box::new(ModuleDirSource::open(modules)?));
        }

        let skip = ClassFilter::new(self.config.skip_classes.as_slice());
        let library = ClassFilter::new(self.config.library_classes.as_slice());
        let target = TargetClasses::load(read_archive(input)?, &skip, &library, &external)?;
        log::info!(
            "Loaded {} classes and {} other entries",
            target.len(),
            target.resources().len()
        );
        Ok(ClassRepository::new(target, external))
    }

    /// Instantiate the enabled transformers
    ///
    /// Done before anything runs, so a bad transformer configuration fails fast.
    fn transformers(&self) -> Result<Vec<Box<dyn Transformer>>> {
        let mut transformers = vec![];
        for entry in &self.config.transformers {
            if entry.disable {
                log::debug!("Transformer {} is disabled", entry.name);
                continue;
            }
            transformers.push(self.registry.create(&entry.name, entry.settings())?);
        }
        Ok(transformers)
    }

    /// Transform and verify a repository
    pub fn process(&self, repository: ClassRepository) -> Result<TransformContext> {
        let mut transformers = self.transformers()?;
        let mut context =
            TransformContext::new(repository, self.config.dictionary.clone(), self.config.seed);
        for transformer in &mut transformers {
            log::info!("Running {}", transformer.name());
            transformer.run(&mut context)?;
        }

        log::info!("Verifying");
        let methods = verify_classes(&mut context.repository)?;
        log::debug!("Verified {} methods", methods);
        Ok(context)
    }

    /// Write the program classes, the untouched entries, and the extra archives
    ///
    /// On failure, any existing file at `output` is left as it was.
    pub fn write(&self, repository: &ClassRepository, output: &Path) -> Result<()> {
        log::info!("Writing {}", output.display());
        let mut writer = ArchiveWriter::create_beside(output)?;
        for class in repository.program_classes() {
            writer.add(&class.entry_name(), &write_class(class)?)?;
        }
        for resource in repository.target.resources() {
            writer.add(&resource.name, &resource.data)?;
        }
        for path in &self.config.extract_jars {
            writer.merge(path)?;
        }
        writer.persist(output)
    }
}

/// Verify every method of every program class, returning how many were checked
pub fn verify_classes(repository: &mut ClassRepository) -> Result<usize> {
    let mut verified = 0;
    let (hierarchy, classes) = repository.hierarchy_and_program_classes();
    for class in classes {
        verified += verify_class(class, &hierarchy)?;
    }
    Ok(verified)
}

fn verify_class(class: &mut ClassEntity, hierarchy: &dyn TypeHierarchy) -> Result<usize> {
    let mut methods = mem::take(&mut class.methods);
    let result = methods
        .iter_mut()
        .try_for_each(|method| verify_method(class, method, hierarchy));
    let verified = methods.len();
    class.methods = methods;
    result.map(|()| verified)
}
