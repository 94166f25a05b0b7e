//! Error types for lcp-core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Every variant belongs to one of five categories, exposed through
//! [`LcpError::kind`]:
//!
//! - **Format**: the license or the encryption manifest could not be parsed,
//!   or a protected entry failed to inflate
//! - **UnsupportedAlgorithm**: the manifest names an algorithm we cannot decrypt
//! - **Crypto**: wrong key length, bad padding, key check mismatch
//! - **Io**: reading or writing the archives failed
//! - **Finalize**: the output archive's central directory could not be written
//!
//! None of these are retryable: they are caused by bad input, a bad key or a
//! broken stream, and the same call would fail the same way again.

use thiserror::Error;

/// Result type alias using our LcpError type
pub type Result<T> = std::result::Result<T, LcpError>;

/// Coarse error category, used by callers that only need to know what went wrong
/// and not where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    UnsupportedAlgorithm,
    Crypto,
    Io,
    Finalize,
}

/// Main error type for lcp-core
#[derive(Error, Debug)]
pub enum LcpError {
    // ===== Format Errors =====

    /// License document is not valid JSON or misses a required field
    #[error("Invalid license document: {0}")]
    InvalidLicense(String),

    /// A base64 field of the license could not be decoded
    #[error("Invalid base64 in license field '{field}': {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// encryption.xml is not well-formed or has an invalid attribute
    #[error("Invalid encryption manifest: {0}")]
    InvalidManifest(String),

    /// A cipher reference URI is not a valid percent-encoded path
    #[error("Invalid entry path '{uri}' in encryption manifest: {reason}")]
    InvalidEntryPath { uri: String, reason: String },

    /// Decrypted data declared as DEFLATE-compressed did not inflate
    #[error("Failed to inflate decrypted data: {0}")]
    InflateFailed(#[source] std::io::Error),

    // ===== Algorithm Errors =====

    /// The manifest references an encryption algorithm we do not implement
    #[error("Unsupported encryption algorithm for file {path}: {algorithm}")]
    UnsupportedAlgorithm { path: String, algorithm: String },

    // ===== Crypto/DRM Errors =====

    /// User key supplied by the caller is not 64 hex characters
    #[error("Invalid user key: {0}")]
    InvalidUserKey(String),

    /// Key has the wrong size for AES-256
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Ciphertext is too short for its IV or not block aligned
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Trailing padding byte points outside of the plaintext
    #[error("Invalid padding length {padding} (data length is {length})")]
    InvalidPadding { padding: usize, length: usize },

    /// Decrypted key check does not match the license id (wrong user key)
    #[error("Decrypted key check does not match license ID ({license_id})")]
    KeyMismatch { license_id: String },

    // ===== Archive/IO Errors =====

    /// A required entry is absent from the source archive
    #[error("Entry not found in archive: {0}")]
    MissingEntry(String),

    /// Archive could not be read or written
    #[error("Archive error while {context}: {source}")]
    Archive {
        context: String,
        #[source]
        source: zip::result::ZipError,
    },

    /// Standard I/O error with the operation that failed
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Central directory of the output archive could not be written
    #[error("Failed to finalize output archive: {0}")]
    Finalize(#[source] zip::result::ZipError),

    /// A single archive entry failed; wraps the underlying cause
    #[error("Failed to process entry {name}: {source}")]
    Entry {
        name: String,
        #[source]
        source: Box<LcpError>,
    },
}

impl From<serde_json::Error> for LcpError {
    fn from(err: serde_json::Error) -> Self {
        LcpError::InvalidLicense(err.to_string())
    }
}

impl From<quick_xml::Error> for LcpError {
    fn from(err: quick_xml::Error) -> Self {
        LcpError::InvalidManifest(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for LcpError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        LcpError::InvalidManifest(err.to_string())
    }
}

// Helper methods for creating common errors
impl LcpError {
    /// Create an Io error with the operation that failed
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        LcpError::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an Archive error with the operation that failed
    pub fn archive<S: Into<String>>(context: S, source: zip::result::ZipError) -> Self {
        LcpError::Archive {
            context: context.into(),
            source,
        }
    }

    /// Attach an archive entry name to an error
    pub fn in_entry<S: Into<String>>(self, name: S) -> Self {
        LcpError::Entry {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LcpError::InvalidLicense(_)
            | LcpError::InvalidBase64 { .. }
            | LcpError::InvalidManifest(_)
            | LcpError::InvalidEntryPath { .. }
            | LcpError::InflateFailed(_) => ErrorKind::Format,
            LcpError::UnsupportedAlgorithm { .. } => ErrorKind::UnsupportedAlgorithm,
            LcpError::InvalidUserKey(_)
            | LcpError::InvalidKeyLength { .. }
            | LcpError::MalformedCiphertext(_)
            | LcpError::InvalidPadding { .. }
            | LcpError::KeyMismatch { .. } => ErrorKind::Crypto,
            LcpError::MissingEntry(_) | LcpError::Archive { .. } | LcpError::Io { .. } => {
                ErrorKind::Io
            }
            LcpError::Finalize(_) => ErrorKind::Finalize,
            LcpError::Entry { source, .. } => source.kind(),
        }
    }

    /// Check if error is related to DRM/crypto operations
    pub fn is_crypto_error(&self) -> bool {
        self.kind() == ErrorKind::Crypto
    }

    /// Name of the archive entry this error happened in, if any
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            LcpError::Entry { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            LcpError::KeyMismatch { .. } => {
                "The user key does not unlock this book's license. Please check the key and try again.".to_string()
            }
            LcpError::InvalidUserKey(reason) => {
                format!("The user key is invalid ({}). It must be 64 hexadecimal characters.", reason)
            }
            LcpError::UnsupportedAlgorithm { path, algorithm } => {
                format!("'{}' is protected with an unsupported algorithm ({}); the book cannot be decrypted.", path, algorithm)
            }
            LcpError::MissingEntry(name) => {
                format!("The file is not an LCP-protected EPUB: '{}' is missing.", name)
            }
            LcpError::Entry { name, source } => {
                format!("{} (while processing '{}')", source.user_message(), name)
            }
            _ => self.to_string(),
        }
    }
}
