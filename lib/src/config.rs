//! Run configuration
//!
//! The configuration is a JSON document with camelCase keys. Every key is optional:
//!
//! ```json
//! {
//!   "logLevel": "debug",
//!   "inputPath": "app.jar",
//!   "outputPath": "app-obf.jar",
//!   "libraries": ["libs/guava.jar"],
//!   "platformModules": "/opt/jdk-modules",
//!   "skipClasses": ["com/example/debug/**"],
//!   "libraryClasses": ["com/thirdparty/**"],
//!   "extractJars": [],
//!   "dictionary": { "valueType": "range", "value": "a--z", "baseLength": 2 },
//!   "seed": 42,
//!   "transformers": [
//!     { "name": "NumberEncryption", "doFloat": false },
//!     { "name": "GotoReplacer", "disable": true },
//!     { "name": "NameObfuscation", "renameMain": true }
//!   ]
//! }
//! ```

use crate::rename::Dictionary;
use crate::transform::NameObfuscation;
use crate::{Error, Result};
use rand::rngs::SmallRng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Default log filter, used when `RUST_LOG` is not set
    pub log_level: String,

    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,

    /// Library jars that external classes are loaded from
    pub libraries: Vec<PathBuf>,

    /// Directory of exploded platform modules (`<module>/<binary name>.class`)
    pub platform_modules: Option<PathBuf>,

    /// Input classes left out of the output entirely
    pub skip_classes: Vec<String>,

    /// Input classes treated as external (kept byte for byte, never rewritten)
    pub library_classes: Vec<String>,

    /// Archives whose entries are copied into the output
    pub extract_jars: Vec<PathBuf>,

    pub dictionary: DictionarySetting,

    /// Seed for every random choice, for reproducible output
    pub seed: Option<u64>,

    /// Transformers, in the order they run
    pub transformers: Vec<TransformerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: String::from("info"),
            input_path: None,
            output_path: None,
            libraries: vec![],
            platform_modules: None,
            skip_classes: vec![],
            library_classes: vec![],
            extract_jars: vec![],
            dictionary: DictionarySetting::default(),
            seed: None,
            transformers: vec![],
        }
    }
}

impl Config {
    pub fn from_json(source: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(source)?;
        config.dictionary.characters()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Config> {
        log::debug!("Reading configuration {}", path.display());
        Config::from_json(&fs::read_to_string(path)?)
    }

    pub fn input_path(&self) -> Result<&Path> {
        self.input_path
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig(String::from("no input path")))
    }

    pub fn output_path(&self) -> Result<&Path> {
        self.output_path
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig(String::from("no output path")))
    }

    /// Send the mapping report of every renaming pass to `path`
    pub fn set_mapping_path(&mut self, path: &Path) {
        let path = Value::String(path.to_string_lossy().into_owned());
        for entry in &mut self.transformers {
            if entry.name == NameObfuscation::NAME {
                entry.settings.insert(String::from("mappingPath"), path.clone());
            }
        }
    }
}

/// One entry of the transformer list
///
/// Keys other than `name` and `disable` are the transformer's own settings.
#[derive(Clone, Debug, Deserialize)]
pub struct TransformerConfig {
    pub name: String,

    #[serde(default)]
    pub disable: bool,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl TransformerConfig {
    pub fn new(name: impl Into<String>) -> TransformerConfig {
        TransformerConfig {
            name: name.into(),
            disable: false,
            settings: Map::new(),
        }
    }

    pub fn settings(&self) -> Value {
        Value::Object(self.settings.clone())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionaryKind {
    /// One of the named character sets
    Preset,

    /// Characters listed literally
    Chars,

    /// Comma separated character ranges (`a--z,0--9`)
    Range,
}

/// Character set that generated names are drawn from
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DictionarySetting {
    pub value_type: DictionaryKind,
    pub value: String,
    pub base_length: usize,

    /// Names that are never generated
    pub blacklist: Vec<String>,
}

impl Default for DictionarySetting {
    fn default() -> Self {
        DictionarySetting {
            value_type: DictionaryKind::Preset,
            value: String::from("english"),
            base_length: 1,
            blacklist: vec![],
        }
    }
}

fn preset(name: &str) -> Option<&'static [&'static str]> {
    Some(match name {
        "english" => &["a--z", "A--Z"],
        "number" => &["0--9"],
        "arabic" => &[
            "\u{0600}--\u{06FF}",
            "\u{0750}--\u{077F}",
            "\u{08A0}--\u{08FF}",
            "\u{0870}--\u{089F}",
            "\u{FE70}--\u{FEFF}",
        ],
        "chinese" => &["\u{4E00}--\u{9FFF}", "\u{3400}--\u{4DBF}", "\u{F900}--\u{FAFF}"],
        "thaiphosym" => &["\u{0E31}", "\u{0E34}--\u{0E3A}", "\u{0E47}--\u{0E4E}"],
        "spaces" => &[
            "\u{2007}",
            "\u{200B}--\u{200D}",
            "\u{202F}",
            "\u{2060}",
            "\u{FEFF}",
        ],
        _ => return None,
    })
}

/// Expand a single character or an inclusive `a--b` range
fn expand_range(range: &str, into: &mut Vec<char>) -> Result<()> {
    let single = |part: &str| -> Result<char> {
        let mut chars = part.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::InvalidDictionary(format!("malformed range {:?}", range))),
        }
    };
    match range.split_once("--") {
        Some((start, end)) => {
            let (start, end) = (single(start)?, single(end)?);
            if start > end {
                return Err(Error::InvalidDictionary(format!(
                    "range {:?} is backwards",
                    range
                )));
            }
            into.extend(start..=end);
        }
        None => into.push(single(range)?),
    }
    Ok(())
}

impl DictionarySetting {
    /// Characters of the dictionary, in order
    pub fn characters(&self) -> Result<Vec<char>> {
        let mut chars = vec![];
        match self.value_type {
            DictionaryKind::Preset => {
                let ranges = preset(&self.value).ok_or_else(|| {
                    Error::InvalidDictionary(format!("unknown preset {:?}", self.value))
                })?;
                for range in ranges {
                    expand_range(range, &mut chars)?;
                }
            }
            DictionaryKind::Chars => chars.extend(self.value.chars()),
            DictionaryKind::Range => {
                for range in self.value.split(',') {
                    expand_range(range, &mut chars)?;
                }
            }
        }
        if chars.is_empty() {
            return Err(Error::InvalidDictionary(String::from("no characters")));
        }
        Ok(chars)
    }

    /// Make a fresh name generator (with the blacklist applied)
    pub fn build(&self, rng: SmallRng) -> Result<Dictionary> {
        let mut dictionary = Dictionary::new(self.characters()?, self.base_length, rng)?;
        dictionary.add_blacklist(self.blacklist.iter().cloned());
        Ok(dictionary)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn full_document() {
        let config = Config::from_json(
            r#"{
                "inputPath": "in.jar",
                "libraries": ["a.jar", "b.jar"],
                "skipClasses": ["debug/**"],
                "dictionary": { "valueType": "range", "value": "a--c,x", "blacklist": ["b"] },
                "seed": 9,
                "transformers": [
                    { "name": "GotoReplacer", "disable": true },
                    { "name": "NameObfuscation", "renameMain": true }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.input_path().unwrap(), Path::new("in.jar"));
        assert!(matches!(config.output_path(), Err(Error::InvalidConfig(_))));
        assert_eq!(config.libraries.len(), 2);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.dictionary.characters().unwrap(), vec!['a', 'b', 'c', 'x']);

        assert_eq!(config.transformers.len(), 2);
        assert!(config.transformers[0].disable);
        assert!(config.transformers[0].settings.is_empty());
        assert_eq!(
            config.transformers[1].settings.get("renameMain"),
            Some(&Value::Bool(true))
        );

        let mut config = config;
        config.set_mapping_path(Path::new("out/names.txt"));
        assert!(config.transformers[0].settings.is_empty());
        assert_eq!(
            config.transformers[1].settings.get("mappingPath"),
            Some(&Value::String(String::from("out/names.txt")))
        );

        let mut dictionary = config.dictionary.build(SmallRng::seed_from_u64(1)).unwrap();
        for _ in 0..3 {
            assert_ne!(dictionary.next_name(), "b");
        }
    }

    #[test]
    fn presets() {
        let english = DictionarySetting::default().characters().unwrap();
        assert_eq!(english.len(), 52);
        assert_eq!((english[0], english[51]), ('a', 'Z'));

        let spaces = DictionarySetting {
            value: String::from("spaces"),
            ..DictionarySetting::default()
        };
        assert_eq!(spaces.characters().unwrap().len(), 7);

        let unknown = DictionarySetting {
            value: String::from("klingon"),
            ..DictionarySetting::default()
        };
        assert!(matches!(unknown.characters(), Err(Error::InvalidDictionary(_))));
    }

    #[test]
    fn invalid_dictionaries() {
        let setting = |value_type, value: &str, base_length| DictionarySetting {
            value_type,
            value: value.to_owned(),
            base_length,
            blacklist: vec![],
        };
        let rng = || SmallRng::seed_from_u64(0);
        assert!(setting(DictionaryKind::Range, "z--a", 1).characters().is_err());
        assert!(setting(DictionaryKind::Range, "ab--c", 1).characters().is_err());
        assert!(setting(DictionaryKind::Chars, "", 1).characters().is_err());
        assert!(setting(DictionaryKind::Chars, "abca", 1).build(rng()).is_err());
        assert!(setting(DictionaryKind::Chars, "abc", 0).build(rng()).is_err());
        assert!(setting(DictionaryKind::Chars, "abc", 2).build(rng()).is_ok());
    }
}
