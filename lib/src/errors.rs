use crate::jvm::code::EditError;
use thiserror::Error;

/// Result type used throughout the obfuscator
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run
///
/// Recoverable conditions (an exclusion-driven skip, a duplicate merged archive entry) are logged
/// where they happen and never reach this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A class needed for a complete view of the hierarchy could not be found in any source
    #[error("class not found: {name} (needed by {needed_by})")]
    ClassNotFound { name: String, needed_by: String },

    /// The super-class chain loops back on itself
    #[error("cyclic inheritance involving {0}")]
    HierarchyCycle(String),

    /// A field or method with the same name and descriptor already exists in the class
    #[error("duplicate member {owner}.{name}{descriptor}")]
    DuplicateMember {
        owner: String,
        name: String,
        descriptor: String,
    },

    /// A rename slot was assigned twice in the same pass
    #[error("rename of {0} assigned twice")]
    DuplicateRename(String),

    #[error("malformed class {entry}: {message}")]
    MalformedClass { entry: String, message: String },

    #[error("unsupported constant pool entry (tag {tag}) in {entry}")]
    UnsupportedConstant { entry: String, tag: u8 },

    #[error("constant pool of {0} overflowed")]
    ConstantPoolOverflow(String),

    #[error("branch offset out of range in {0}")]
    BranchOffsetOverflow(String),

    #[error("method code too large in {0}")]
    MethodCodeOverflow(String),

    /// Structural verification failed; the dump has already been logged
    #[error("verification of {method} failed at instruction {index}: {message}")]
    Verification {
        method: String,
        index: usize,
        message: String,
    },

    #[error("invalid dictionary: {0}")]
    InvalidDictionary(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Edit(#[from] EditError),
}

impl Error {
    pub(crate) fn malformed(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MalformedClass {
            entry: entry.into(),
            message: message.into(),
        }
    }
}
