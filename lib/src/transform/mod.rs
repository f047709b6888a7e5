//! Transformation passes
//!
//! A [`Transformer`] rewrites the program classes of a [`TransformContext`] in place. Passes are
//! created by name from the configuration through a [`TransformerRegistry`], and run one after
//! the other by the [`crate::obfuscator::Obfuscator`].

mod context;
mod flow_obfuscation;
mod goto_replacer;
mod invoke_proxy;
mod name_obfuscation;
mod number_encryption;
mod string_encryption;

pub use context::*;
pub use flow_obfuscation::*;
pub use goto_replacer::*;
pub use invoke_proxy::*;
pub use name_obfuscation::*;
pub use number_encryption::*;
pub use string_encryption::*;

use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// One pass over the program
pub trait Transformer {
    /// Name used in the configuration
    fn name(&self) -> &'static str;

    fn run(&mut self, context: &mut TransformContext) -> Result<()>;
}

/// Makes a transformer out of its JSON settings
pub type TransformerFactory = fn(Value) -> serde_json::Result<Box<dyn Transformer>>;

/// Transformers that can be named in the configuration
pub struct TransformerRegistry {
    factories: IndexMap<&'static str, TransformerFactory>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        let mut registry = TransformerRegistry::empty();
        registry.register(NameObfuscation::NAME, |settings| {
            Ok(Box::new(NameObfuscation::new(serde_json::from_value(settings)?)))
        });
        registry.register(GotoReplacer::NAME, |_| Ok(Box::new(GotoReplacer::default())));
        registry.register(NumberEncryption::NAME, |settings| {
            Ok(Box::new(NumberEncryption::new(serde_json::from_value(settings)?)))
        });
        registry.register(StringEncryption::NAME, |_| Ok(Box::new(StringEncryption)));
        registry.register(InvokeProxy::NAME, |settings| {
            Ok(Box::new(InvokeProxy::new(serde_json::from_value(settings)?)))
        });
        registry.register(FlowObfuscation::NAME, |_| Ok(Box::new(FlowObfuscation)));
        registry
    }
}

impl TransformerRegistry {
    pub fn empty() -> TransformerRegistry {
        TransformerRegistry {
            factories: IndexMap::new(),
        }
    }

    /// Add (or replace) a transformer
    pub fn register(&mut self, name: &'static str, factory: TransformerFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Create a transformer from its configured name and settings
    ///
    /// Both an unknown name and settings that don't deserialize are configuration errors.
    pub fn create(&self, name: &str, settings: Value) -> Result<Box<dyn Transformer>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            Error::InvalidConfig(format!(
                "unknown transformer {} (known: {})",
                name,
                known.join(", ")
            ))
        })?;
        factory(settings)
            .map_err(|err| Error::InvalidConfig(format!("settings of {}: {}", name, err)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_by_name() {
        let registry = TransformerRegistry::default();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![
                "NameObfuscation",
                "GotoReplacer",
                "NumberEncryption",
                "StringEncryption",
                "InvokeProxy",
                "FlowObfuscation"
            ]
        );

        for name in registry.names() {
            let transformer = registry.create(name, json!({})).unwrap();
            assert_eq!(transformer.name(), name);
        }
    }

    #[test]
    fn unknown_names_are_fatal() {
        let registry = TransformerRegistry::default();
        match registry.create("StringEncrypt", json!({})) {
            Err(Error::InvalidConfig(message)) => {
                assert!(message.contains("StringEncrypt"));
                assert!(message.contains("StringEncryption"));
            }
            other => panic!("unexpected {:?}", other.map(|transformer| transformer.name())),
        }
    }

    #[test]
    fn bad_settings_are_fatal() {
        let registry = TransformerRegistry::default();
        let result = registry.create("NameObfuscation", json!({ "renameClass": "sometimes" }));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
