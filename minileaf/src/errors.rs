use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::{atomic, Atomic};

/// Error kinds for Minileaf operations.
///
/// Each kind describes a specific category of failure surfaced at the API
/// boundary, enabling precise error handling. Data-bearing variants carry the
/// context a caller needs to react (offending index name, size versus cap,
/// conflicting id kinds).
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A unique index rejected a write because the key is already mapped to a
    /// different document id.
    DuplicateKey {
        /// Name of the violated index.
        index_name: String,
        /// Textual form of the duplicated key.
        key: String,
    },
    /// A filter contains an unknown operator or a malformed operand shape.
    InvalidQuery,
    /// A document's serialized form exceeds the configured size cap.
    DocumentTooLarge {
        /// Serialized size of the rejected document in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },
    /// Entity to document conversion failure.
    CodecError,
    /// I/O failure or framing corruption in a storage engine.
    StorageError,
    /// AEAD authentication tag mismatch while decrypting a stored record.
    CorruptedCiphertext,
    /// A named collection was reopened with a different id kind.
    CollectionIdTypeMismatch {
        /// The id kind the collection was first opened with.
        existing: String,
        /// The id kind requested now.
        requested: String,
    },
    /// The named index does not exist.
    IndexNotFound(String),
    /// An index with the given name already exists.
    IndexAlreadyExists(String),
    /// Failed to build an index over existing documents.
    IndexBuildFailed,

    /// The provided document id is invalid or cannot be parsed.
    InvalidId,
    /// The operation is not valid in the current context.
    InvalidOperation,
    /// Generic IO error.
    IOError,
    /// The file was not found.
    FileNotFound,
    /// Permission denied for a file operation.
    PermissionDenied,
    /// On-disk data failed a structural sanity check.
    FileCorrupted,
    /// Error encoding or decoding data.
    EncodingError,
    /// The engine has already been closed.
    StoreAlreadyClosed,
    /// Internal error (usually indicates a bug).
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::DuplicateKey { index_name, key } => {
                write!(f, "Duplicate key '{}' in index '{}'", key, index_name)
            }
            ErrorKind::InvalidQuery => write!(f, "Invalid query"),
            ErrorKind::DocumentTooLarge { size, max } => {
                write!(f, "Document too large ({} bytes, max {})", size, max)
            }
            ErrorKind::CodecError => write!(f, "Codec error"),
            ErrorKind::StorageError => write!(f, "Storage error"),
            ErrorKind::CorruptedCiphertext => write!(f, "Corrupted ciphertext"),
            ErrorKind::CollectionIdTypeMismatch {
                existing,
                requested,
            } => write!(
                f,
                "Collection id type mismatch (existing: {}, requested: {})",
                existing, requested
            ),
            ErrorKind::IndexNotFound(name) => write!(f, "Index '{}' not found", name),
            ErrorKind::IndexAlreadyExists(name) => write!(f, "Index '{}' already exists", name),
            ErrorKind::IndexBuildFailed => write!(f, "Index build failed"),
            ErrorKind::InvalidId => write!(f, "Invalid ID"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::FileNotFound => write!(f, "File not found"),
            ErrorKind::PermissionDenied => write!(f, "Permission denied"),
            ErrorKind::FileCorrupted => write!(f, "File corrupted"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::StoreAlreadyClosed => write!(f, "Store already closed"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Minileaf error type.
///
/// `MinileafError` encapsulates the error message, kind, and optional cause.
/// It supports error chaining and backtraces for debugging.
///
/// # Examples
///
/// ```rust,ignore
/// use minileaf::errors::{MinileafError, ErrorKind};
///
/// // Create a simple error
/// let err = MinileafError::new("Index not found", ErrorKind::IndexNotFound("age_1".into()));
///
/// // Create an error with a cause
/// let cause = MinileafError::new("IO failed", ErrorKind::IOError);
/// let err = MinileafError::new_with_cause("Snapshot failed", ErrorKind::StorageError, cause);
/// ```
#[derive(Clone)]
pub struct MinileafError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<MinileafError>>,
    backtrace: Atomic<Backtrace>,
}

impl MinileafError {
    /// Creates a new `MinileafError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        MinileafError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `MinileafError` with a cause error, preserving the chain
    /// for debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: MinileafError) -> Self {
        MinileafError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&MinileafError> {
        self.cause.as_deref()
    }
}

impl Display for MinileafError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for MinileafError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for MinileafError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Minileaf operations.
///
/// `MinileafResult<T>` is shorthand for `Result<T, MinileafError>`. All
/// fallible Minileaf operations return this type.
pub type MinileafResult<T> = Result<T, MinileafError>;

// From trait implementations for automatic error conversion
impl From<std::io::Error> for MinileafError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::UnexpectedEof => ErrorKind::FileCorrupted,
            _ => ErrorKind::IOError,
        };
        MinileafError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<serde_json::Error> for MinileafError {
    fn from(err: serde_json::Error) -> Self {
        MinileafError::new(
            &format!("JSON serialization error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<std::string::FromUtf8Error> for MinileafError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        MinileafError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<std::num::ParseIntError> for MinileafError {
    fn from(err: std::num::ParseIntError) -> Self {
        MinileafError::new(&format!("Integer parsing error: {}", err), ErrorKind::InvalidId)
    }
}

impl From<regex::Error> for MinileafError {
    fn from(err: regex::Error) -> Self {
        MinileafError::new(
            &format!("Invalid regular expression: {}", err),
            ErrorKind::InvalidQuery,
        )
    }
}

impl From<String> for MinileafError {
    fn from(msg: String) -> Self {
        MinileafError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for MinileafError {
    fn from(msg: &str) -> Self {
        MinileafError::new(msg, ErrorKind::InternalError)
    }
}
