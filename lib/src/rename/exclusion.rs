use crate::pattern::{ClassFilter, MemberPattern};
use crate::rename::ExcludeSettings;

/// Compiled exclusion rules
///
/// Every rule is checked; a class or member is excluded as soon as one rule matches it.
#[derive(Clone, Debug, Default)]
pub struct ExclusionRules {
    classes: ClassFilter,
    methods: Vec<MemberPattern>,
    fields: Vec<MemberPattern>,
}

fn member_patterns(kind: &str, rules: &[String]) -> Vec<MemberPattern> {
    rules
        .iter()
        .filter_map(|rule| {
            let pattern = MemberPattern::parse(rule);
            if pattern.is_none() {
                log::warn!("Ignoring malformed {} exclusion: {:?}", kind, rule);
            }
            pattern
        })
        .collect()
}

impl ExclusionRules {
    pub fn new(settings: &ExcludeSettings) -> ExclusionRules {
        ExclusionRules {
            classes: ClassFilter::new(settings.classes.as_slice()),
            methods: member_patterns("method", &settings.methods),
            fields: member_patterns("field", &settings.fields),
        }
    }

    pub fn excludes_class(&self, name: &str) -> bool {
        self.classes.matches(name)
    }

    pub fn excludes_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.methods
            .iter()
            .any(|pattern| pattern.matches(owner, name, descriptor))
    }

    pub fn excludes_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.fields
            .iter()
            .any(|pattern| pattern.matches(owner, name, descriptor))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn malformed_rules_are_dropped() {
        let rules = ExclusionRules::new(&ExcludeSettings {
            classes: vec![String::from("keep/**")],
            methods: vec![String::from("a/B run"), String::from("a/* run ()V")],
            fields: vec![String::from("a/B * I")],
        });
        assert_eq!(rules.methods.len(), 1);
        assert!(rules.excludes_class("keep/deep/Thing"));
        assert!(!rules.excludes_class("other/Thing"));
        assert!(rules.excludes_method("a/C", "run", "()V"));
        assert!(!rules.excludes_method("a/C", "run", "(I)V"));
        assert!(rules.excludes_field("a/B", "count", "I"));
        assert!(!rules.excludes_field("a/C", "count", "I"));
    }
}
