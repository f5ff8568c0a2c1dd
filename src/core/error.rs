//! Error types for srcmark
//!
//! One enum covers the whole library: configuration calls, the byte I/O
//! adapter, both XML paths and the pipeline all report `MarkupError`.

use thiserror::Error;

/// Result type alias for translator operations
pub type Result<T> = std::result::Result<T, MarkupError>;

/// Errors that can occur during translation in either direction
#[derive(Error, Debug)]
pub enum MarkupError {
    /// A required identifier was empty or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Call made against an archive in the wrong role (reader vs writer, open vs closed)
    #[error("invalid I/O operation: {0}")]
    InvalidIoOperation(String),

    /// Structural precondition failed, e.g. element write before a unit was started
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unit has no language and none can be inferred from its filename
    #[error("no language set{}", filename.as_deref().map(|f| format!(" for '{f}'")).unwrap_or_default())]
    UnsetLanguage { filename: Option<String> },

    /// Underlying read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding name not recognized
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Language name not recognized
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// Extension already registered to a different language
    #[error("extension '{extension}' conflicts with existing registration")]
    ExtensionConflict { extension: String },

    /// Reserved prefix bound to a non-canonical URI
    #[error("namespace prefix '{prefix}' is reserved and cannot map to '{uri}'")]
    NamespaceConflict { prefix: String, uri: String },

    /// Malformed XML on read, or malformed markup token stream on write
    #[error("parse error: {0}")]
    Parse(String),

    /// Transformation could not be stored or applied
    #[error("transform error: {0}")]
    Transform(String),
}

impl MarkupError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        MarkupError::InvalidArgument(message.into())
    }

    pub fn invalid_io_operation(message: impl Into<String>) -> Self {
        MarkupError::InvalidIoOperation(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        MarkupError::InvalidInput(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        MarkupError::Parse(message.into())
    }

    /// Process exit code the CLI maps this error to
    pub fn exit_code(&self) -> i32 {
        match self {
            MarkupError::UnknownLanguage(_) => 6,
            _ => 1,
        }
    }

    /// Errors that stop a run; the rest are logged as warnings and the unit skipped
    pub fn is_fatal_for_archive(&self, solo: bool) -> bool {
        match self {
            MarkupError::UnsetLanguage { .. } => solo,
            _ => true,
        }
    }
}

impl Clone for MarkupError {
    fn clone(&self) -> Self {
        match self {
            MarkupError::InvalidArgument(m) => MarkupError::InvalidArgument(m.clone()),
            MarkupError::InvalidIoOperation(m) => MarkupError::InvalidIoOperation(m.clone()),
            MarkupError::InvalidInput(m) => MarkupError::InvalidInput(m.clone()),
            MarkupError::UnsetLanguage { filename } => MarkupError::UnsetLanguage {
                filename: filename.clone(),
            },
            // io::Error is not Clone; keep the kind and message
            MarkupError::Io(e) => MarkupError::Io(std::io::Error::new(e.kind(), e.to_string())),
            MarkupError::UnsupportedEncoding(m) => MarkupError::UnsupportedEncoding(m.clone()),
            MarkupError::UnknownLanguage(m) => MarkupError::UnknownLanguage(m.clone()),
            MarkupError::ExtensionConflict { extension } => MarkupError::ExtensionConflict {
                extension: extension.clone(),
            },
            MarkupError::NamespaceConflict { prefix, uri } => MarkupError::NamespaceConflict {
                prefix: prefix.clone(),
                uri: uri.clone(),
            },
            MarkupError::Parse(m) => MarkupError::Parse(m.clone()),
            MarkupError::Transform(m) => MarkupError::Transform(m.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MarkupError::invalid_input("element write before unit start");
        assert!(err.to_string().contains("element write before unit start"));
    }

    #[test]
    fn test_unset_language_display() {
        let err = MarkupError::UnsetLanguage {
            filename: Some("a.foo".to_string()),
        };
        assert!(err.to_string().contains("a.foo"));

        let bare = MarkupError::UnsetLanguage { filename: None };
        assert_eq!(bare.to_string(), "no language set");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MarkupError = io_err.into();
        assert!(matches!(err, MarkupError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MarkupError::UnknownLanguage("Pascal".into()).exit_code(), 6);
        assert_eq!(MarkupError::parse("bad tag").exit_code(), 1);
    }

    #[test]
    fn test_unset_language_fatal_only_solo() {
        let err = MarkupError::UnsetLanguage { filename: None };
        assert!(err.is_fatal_for_archive(true));
        assert!(!err.is_fatal_for_archive(false));
    }

    #[test]
    fn test_clone_preserves_kind() {
        let err = MarkupError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let cloned = err.clone();
        assert!(
            matches!(cloned, MarkupError::Io(ref e) if e.kind() == std::io::ErrorKind::PermissionDenied)
        );
    }
}
