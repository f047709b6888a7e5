use crate::jvm::class_file::read_class;
use crate::jvm::model::{ClassEntity, ClassOrigin};
use crate::jvm::{BinaryName, Name};
use crate::Result;
use elsa::map::FrozenMap;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// Somewhere read-only classes can be looked up by name
pub trait ClassSource {
    /// Human readable location, used as the origin of classes found here
    fn describe(&self) -> &str;

    /// Raw class file bytes for the class, if this source has it
    fn find(&self, name: &BinaryName) -> Result<Option<Vec<u8>>>;
}

/// Library jar
pub struct JarSource {
    path: String,
    archive: RefCell<ZipArchive<File>>,
}

impl JarSource {
    pub fn open(path: &Path) -> Result<JarSource> {
        let archive = ZipArchive::new(File::open(path)?)?;
        Ok(JarSource {
            path: path.display().to_string(),
            archive: RefCell::new(archive),
        })
    }
}

impl ClassSource for JarSource {
    fn describe(&self) -> &str {
        &self.path
    }

    fn find(&self, name: &BinaryName) -> Result<Option<Vec<u8>>> {
        let mut archive = self.archive.borrow_mut();
        let entry_name = format!("{}.class", name.as_str());
        let mut file = match archive.by_name(&entry_name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut bytes = vec![];
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}

/// Directory of exploded platform modules, laid out as `<module>/<binary name>.class`
pub struct ModuleDirSource {
    root: String,
    modules: Vec<PathBuf>,
}

impl ModuleDirSource {
    pub fn open(root: &Path) -> Result<ModuleDirSource> {
        let mut modules = vec![];
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if path.is_dir() {
                modules.push(path);
            }
        }
        modules.sort();
        Ok(ModuleDirSource {
            root: root.display().to_string(),
            modules,
        })
    }
}

impl ClassSource for ModuleDirSource {
    fn describe(&self) -> &str {
        &self.root
    }

    fn find(&self, name: &BinaryName) -> Result<Option<Vec<u8>>> {
        let relative = format!("{}.class", name.as_str());
        for module in &self.modules {
            let path = module.join(&relative);
            if path.is_file() {
                log::trace!("Found {} in module {}", name, module.display());
                return Ok(Some(fs::read(path)?));
            }
        }
        Ok(None)
    }
}

/// Read-only classes, loaded on demand
///
/// Sources are searched in the order they were added. A class is parsed the first time it is
/// resolved and cached from then on; since the cache only ever grows, references handed out by
/// [`ExternalClasses::resolve`] stay valid while more classes are loaded.
#[derive(Default)]
pub struct ExternalClasses {
    sources: Vec<Box<dyn ClassSource>>,
    cache: FrozenMap<BinaryName, Box<ClassEntity>>,
}

impl ExternalClasses {
    pub fn new() -> ExternalClasses {
        ExternalClasses::default()
    }

    pub fn add_source(&mut self, source: Box<dyn ClassSource>) {
        log::debug!("Adding library source {}", source.describe());
        self.sources.push(source);
    }

    /// Make a class available without going through a source
    pub fn insert(&self, mut class: ClassEntity) -> &ClassEntity {
        if !class.origin.is_external() {
            class.origin = ClassOrigin::External {
                source: String::from("<preloaded>"),
            };
        }
        self.cache.insert(class.name.clone(), Box::new(class))
    }

    pub fn resolve(&self, name: &BinaryName) -> Result<Option<&ClassEntity>> {
        if let Some(class) = self.cache.get(name) {
            return Ok(Some(class));
        }
        for source in &self.sources {
            if let Some(bytes) = source.find(name)? {
                let origin = ClassOrigin::External {
                    source: source.describe().to_owned(),
                };
                let class = read_class(&bytes, origin)?;
                return Ok(Some(self.cache.insert(name.clone(), Box::new(class))));
            }
        }
        log::trace!("Class not found in libraries: {}", name);
        Ok(None)
    }
}
