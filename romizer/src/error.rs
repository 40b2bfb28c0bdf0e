use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{class}: malformed class file: {message}")]
    Format { class: String, message: String },

    #[error("{source_name}: bad magic number {magic:#010x}")]
    BadMagic { source_name: String, magic: u32 },

    #[error("{source_name}: unsupported multi-class version {major}.{minor}")]
    UnsupportedVersion { source_name: String, major: u16, minor: u16 },

    #[error("{class}: constant pool index {index} out of range (pool size {len})")]
    IndexOutOfRange { class: String, index: u16, len: usize },

    #[error("{class}: superclass {superclass} could not be found")]
    MissingSuperclass { class: String, superclass: String },

    #[error("class circularity involving {class}")]
    ClassCircularity { class: String },

    #[error("key table {table} is closed, cannot add {entry}")]
    KeyTableClosed { table: &'static str, entry: String },

    #[error("key table {table} ran out of keys at {entry}")]
    KeyOverflow { table: &'static str, entry: String },

    #[error("internal inconsistency: {message}")]
    Internal { message: String },

    #[error("{target}: output write error")]
    OutputWrite { target: String },
}

impl Error {
    pub fn format(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attaches a class name to a low-level parse failure.
    pub fn from_parse(class: impl Into<String>, error: std::io::Error) -> Self {
        Self::Format {
            class: class.into(),
            message: error.to_string(),
        }
    }

    /// True for errors that only invalidate the class being processed.
    pub fn is_per_class(&self) -> bool {
        matches!(
            self,
            Error::Format { .. } | Error::BadMagic { .. } | Error::UnsupportedVersion { .. } | Error::IndexOutOfRange { .. }
        )
    }
}
