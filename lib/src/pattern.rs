//! Class and member name patterns
//!
//! Patterns are written against binary names (`com/example/Foo`):
//!
//!   * `com/example/Foo` matches exactly that class
//!   * `com/example/*` matches classes directly inside `com/example`
//!   * `com/example/**` matches classes inside `com/example` or any package below it
//!   * `*` alone matches classes in the default package, and `**` alone matches everything
//!
//! Member patterns prefix a class pattern to a name and a descriptor, either of which can be `*`:
//! `com/example/Foo run ()V`, `com/example/** * *`.

/// Pattern over binary class names
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassPattern {
    package: Option<String>,
    class: String,
}

fn split_package(name: &str) -> (Option<&str>, &str) {
    match name.rfind('/') {
        Some(idx) => (Some(&name[..idx]), &name[idx + 1..]),
        None => (None, name),
    }
}

impl ClassPattern {
    pub fn parse(pattern: &str) -> ClassPattern {
        let (package, class) = split_package(pattern);
        ClassPattern {
            package: package.map(str::to_owned),
            class: class.to_owned(),
        }
    }

    pub fn matches(&self, class_name: &str) -> bool {
        let (package, simple_name) = split_package(class_name);
        match self.class.as_str() {
            "*" => package == self.package.as_deref(),
            "**" => match (&self.package, package) {
                (None, _) => true,
                (Some(prefix), Some(package)) => {
                    package == prefix
                        || package
                            .strip_prefix(prefix.as_str())
                            .map_or(false, |rest| rest.starts_with('/'))
                }
                (Some(_), None) => false,
            },
            class => class == simple_name && package == self.package.as_deref(),
        }
    }
}

/// Pattern over `(owner, name, descriptor)` member identities
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MemberPattern {
    owner: ClassPattern,
    name: String,
    descriptor: String,
}

impl MemberPattern {
    /// Parse `owner name descriptor` (separated by single spaces)
    ///
    /// Returns `None` if there are fewer than three parts.
    pub fn parse(pattern: &str) -> Option<MemberPattern> {
        let mut parts = pattern.split(' ');
        let owner = parts.next()?;
        let name = parts.next()?;
        let descriptor = parts.next()?;
        Some(MemberPattern {
            owner: ClassPattern::parse(owner),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        })
    }

    pub fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owner.matches(owner)
            && (self.name == "*" || self.name == name)
            && (self.descriptor == "*" || self.descriptor == descriptor)
    }
}

/// Set of class patterns, matching when any one of them does
#[derive(Clone, Default, Debug)]
pub struct ClassFilter {
    patterns: Vec<ClassPattern>,
}

impl ClassFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> ClassFilter {
        ClassFilter {
            patterns: patterns
                .iter()
                .map(|pattern| ClassPattern::parse(pattern.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, class_name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(class_name))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn class_patterns() {
        let exact = ClassPattern::parse("com/example/Foo");
        assert!(exact.matches("com/example/Foo"));
        assert!(!exact.matches("com/example/Bar"));
        assert!(!exact.matches("com/other/Foo"));
        assert!(!exact.matches("Foo"));

        let package = ClassPattern::parse("com/example/*");
        assert!(package.matches("com/example/Foo"));
        assert!(!package.matches("com/example/inner/Foo"));

        let subtree = ClassPattern::parse("com/example/**");
        assert!(subtree.matches("com/example/Foo"));
        assert!(subtree.matches("com/example/inner/Foo"));
        assert!(!subtree.matches("com/examples/Foo"));
        assert!(!subtree.matches("Foo"));

        assert!(ClassPattern::parse("*").matches("Main"));
        assert!(!ClassPattern::parse("*").matches("a/Main"));
        assert!(ClassPattern::parse("**").matches("a/b/Main"));
        assert!(ClassPattern::parse("**").matches("Main"));
    }

    #[test]
    fn member_patterns() {
        assert_eq!(MemberPattern::parse("com/Foo run"), None);

        let exact = MemberPattern::parse("com/Foo run ()V").unwrap();
        assert!(exact.matches("com/Foo", "run", "()V"));
        assert!(!exact.matches("com/Foo", "run", "(I)V"));

        let any_desc = MemberPattern::parse("com/* run *").unwrap();
        assert!(any_desc.matches("com/Bar", "run", "(I)V"));
        assert!(!any_desc.matches("com/Bar", "walk", "(I)V"));

        let any_name = MemberPattern::parse("com/Foo * I").unwrap();
        assert!(any_name.matches("com/Foo", "count", "I"));
        assert!(!any_name.matches("com/Foo", "count", "J"));
    }

    #[test]
    fn filter_checks_every_pattern() {
        let filter = ClassFilter::new(&["com/example/Foo", "org/**"]);
        assert!(filter.matches("com/example/Foo"));
        assert!(filter.matches("org/lib/Util"));
        assert!(!filter.matches("com/example/Bar"));
        assert!(ClassFilter::default().is_empty());
    }
}
