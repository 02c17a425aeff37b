//! Error types for the signing pipeline.
//!
//! A single error enum covers both the PDF object layer (parsing, xref
//! resolution, stream decoding) and the signing pipeline stages. Pipeline code
//! classifies errors with [`Error::kind`] to decide whether a failed job may be
//! redelivered.

use crate::object::ObjectRef;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while stamping, signing or storing documents.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(ObjectRef),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input cannot be handled as a page-structured document
    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    /// The input has no bytes or no pages
    #[error("Document is empty")]
    EmptyDocument,

    /// Key generation, key loading or certificate building failed
    #[error("Crypto provider error: {0}")]
    CryptoProvider(String),

    /// Digest, CMS encoding or embedding failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// The signature container does not fit the reserved /Contents region
    #[error("Signature container needs {required} bytes but only {reserved} were reserved")]
    PlaceholderTooSmall {
        /// Encoded container length in bytes
        required: usize,
        /// Reserved container length in bytes
        reserved: usize,
    },

    /// The document already carries a signature value
    #[error("Document already contains a signature field with a value")]
    AlreadySigned,

    /// Document store read or write failure
    #[error("Store I/O error for key '{key}': {reason}")]
    StoreIo {
        /// Store key involved in the failed operation
        key: String,
        /// Underlying failure description
        reason: String,
    },

    /// Key does not exist in the document store
    #[error("Store key not found: {0}")]
    NotFound(String),

    /// Store operation exceeded its time budget
    #[error("Store operation on '{key}' timed out after {seconds}s")]
    StoreTimeout {
        /// Store key involved in the timed out operation
        key: String,
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// Queue interaction failure
    #[error("Queue error: {0}")]
    Queue(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure classes used by the orchestrator when reporting a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Download/upload failure, transient
    StoreIo,
    /// Malformed or unsupported input, permanent
    UnsupportedDocument,
    /// Input without bytes or pages, permanent
    EmptyDocument,
    /// Key or certificate failure
    CryptoProvider,
    /// Digest or envelope failure
    Signing,
    /// Reserved signature region too small
    PlaceholderTooSmall,
    /// Invalid local configuration
    Config,
}

impl ErrorKind {
    /// Name used in failure records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StoreIo => "StoreIOError",
            ErrorKind::UnsupportedDocument => "UnsupportedDocumentError",
            ErrorKind::EmptyDocument => "EmptyDocumentError",
            ErrorKind::CryptoProvider => "CryptoProviderError",
            ErrorKind::Signing => "SigningError",
            ErrorKind::PlaceholderTooSmall => "PlaceholderTooSmallError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the pipeline failure taxonomy.
    ///
    /// Object-layer errors surface as `UnsupportedDocument`: they only occur
    /// when the input cannot be read as a PDF.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreIo { .. } | Error::NotFound(_) | Error::StoreTimeout { .. } => {
                ErrorKind::StoreIo
            },
            Error::Queue(_) => ErrorKind::StoreIo,
            Error::EmptyDocument => ErrorKind::EmptyDocument,
            Error::CryptoProvider(_) => ErrorKind::CryptoProvider,
            Error::Signing(_) | Error::AlreadySigned => ErrorKind::Signing,
            Error::PlaceholderTooSmall { .. } => ErrorKind::PlaceholderTooSmall,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::StoreIo,
            Error::InvalidHeader(_)
            | Error::ParseError { .. }
            | Error::InvalidXref
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::InvalidPdf(_)
            | Error::Decode(_)
            | Error::UnsupportedFilter(_)
            | Error::CircularReference(_)
            | Error::RecursionLimitExceeded(_)
            | Error::UnsupportedDocument(_) => ErrorKind::UnsupportedDocument,
        }
    }

    /// Whether redelivering the job could succeed.
    ///
    /// Store failures are transient. A missing source key is not: the upload
    /// boundary writes the document before enqueueing the job.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NotFound(_) => false,
            _ => self.kind() == ErrorKind::StoreIo,
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Signing(format!("DER encoding failed: {}", err))
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::CryptoProvider(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
