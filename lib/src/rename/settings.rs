use serde::Deserialize;
use std::path::PathBuf;

/// Settings of the `NameObfuscation` transformer
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenameSettings {
    pub rename_class: bool,
    pub rename_field: bool,
    pub rename_method: bool,

    /// Also rename classes and methods that declare `public static void main(String[])`
    pub rename_main: bool,

    /// Package that top-level classes are moved into (eg. `a/b`)
    pub package_prefix: Option<String>,

    /// Where the mapping report is written (nothing is written if `None`)
    pub mapping_path: Option<PathBuf>,

    pub exclude: ExcludeSettings,
}

impl Default for RenameSettings {
    fn default() -> Self {
        RenameSettings {
            rename_class: true,
            rename_field: true,
            rename_method: true,
            rename_main: false,
            package_prefix: None,
            mapping_path: Some(PathBuf::from("mapping.txt")),
            exclude: ExcludeSettings::default(),
        }
    }
}

/// Raw exclusion rules, see [`crate::pattern`] for the syntax
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExcludeSettings {
    pub classes: Vec<String>,
    pub methods: Vec<String>,
    pub fields: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let settings: RenameSettings = serde_json::from_str(
            r#"{ "renameMain": true, "packagePrefix": "x/y", "exclude": { "classes": ["a/**"] } }"#,
        )
        .unwrap();
        assert!(settings.rename_class && settings.rename_field && settings.rename_method);
        assert!(settings.rename_main);
        assert_eq!(settings.package_prefix.as_deref(), Some("x/y"));
        assert_eq!(settings.mapping_path, Some(PathBuf::from("mapping.txt")));
        assert_eq!(settings.exclude.classes, vec!["a/**"]);
        assert!(settings.exclude.methods.is_empty());

        let no_report: RenameSettings = serde_json::from_str(r#"{ "mappingPath": null }"#).unwrap();
        assert_eq!(no_report.mapping_path, None);
    }
}
