use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces (eg. `java/lang/Object`)
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BinaryName(Cow<'static, str>);

/// Extracts the raw underlying string name
impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Extracts the raw underlying string name
impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl std::borrow::Borrow<str> for BinaryName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data:
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(UnqualifiedName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else if name.starts_with('[') {
            Err(format!("Binary name '{}' is an array type", name))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(BinaryName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    /// Append a numeric suffix to the name (eg. `access` becomes `access2`)
    pub fn with_suffix(&self, n: usize) -> UnqualifiedName {
        UnqualifiedName(Cow::Owned(format!("{}{}", self.as_str(), n)))
    }

    /// Is this one of the angle-bracketed names (constructor or static initializer)?
    pub fn is_special(&self) -> bool {
        self.0.starts_with('<')
    }

    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // JDK names
    pub const CHAR_AT: Self = Self::name("charAt");
    pub const INTBITSTOFLOAT: Self = Self::name("intBitsToFloat");
    pub const LENGTH: Self = Self::name("length");
    pub const LONGBITSTODOUBLE: Self = Self::name("longBitsToDouble");
    pub const MAIN: Self = Self::name("main");
    pub const OUT: Self = Self::name("out");
    pub const PRINTLN: Self = Self::name("println");
    pub const VALUE: Self = Self::name("value");
    pub const VALUEOF: Self = Self::name("valueOf");
    pub const VALUES: Self = Self::name("values");

    // Compiler generated enum members
    pub const DOLLAR_VALUES: Self = Self::name("$values");
    pub const DOLLAR_VALUES_FIELD: Self = Self::name("$VALUES");

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
}

impl BinaryName {
    /// Package portion of the name (eg. `java/lang` for `java/lang/Object`)
    pub fn package(&self) -> Option<&str> {
        self.0.rfind('/').map(|idx| &self.0[..idx])
    }

    /// Name without the package (eg. `Object` for `java/lang/Object`)
    pub fn simple_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => self.0.as_ref(),
        }
    }

    /// Split a nested class name at its last `$` into the enclosing class and the inner part
    ///
    /// Names where either side would be empty (eg. `Foo$` or `$Foo`) are not considered nested.
    pub fn split_nested(&self) -> Option<(BinaryName, &str)> {
        let simple_start = self.0.rfind('/').map_or(0, |idx| idx + 1);
        let dollar = self.0.rfind('$')?;
        if dollar <= simple_start || dollar + 1 == self.0.len() {
            return None;
        }
        let outer = BinaryName(Cow::Owned(self.0[..dollar].to_owned()));
        Some((outer, &self.0[dollar + 1..]))
    }

    /// Build a nested class name `outer$inner`
    pub fn nested(&self, inner: &str) -> BinaryName {
        BinaryName(Cow::Owned(format!("{}${}", self.as_str(), inner)))
    }

    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // JDK names
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const DOUBLE: Self = Self::name("java/lang/Double");
    pub const FLOAT: Self = Self::name("java/lang/Float");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const SYSTEM: Self = Self::name("java/lang/System");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
    pub const PRINT_STREAM: Self = Self::name("java/io/PrintStream");
    pub const METHOD_HANDLE: Self = Self::name("java/lang/invoke/MethodHandle");
    pub const METHOD_TYPE: Self = Self::name("java/lang/invoke/MethodType");
}
