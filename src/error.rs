//! Library errors: one surface type carrying the failure category and a
//! contextual message.

use derive_more::{Display, Error};

/// Failure categories surfaced by signing and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Reference URI missing, malformed, or naming a non-existent element.
    #[display(fmt = "bad reference")]
    BadReference,
    /// Absent `DigestMethod`, `CanonicalizationMethod` or `Algorithm`.
    #[display(fmt = "missing method")]
    MissingMethod,
    /// Transform algorithm URI not implemented.
    #[display(fmt = "unknown transform")]
    UnknownTransform,
    /// Digest or signature algorithm URI not implemented.
    #[display(fmt = "unknown algorithm")]
    UnknownAlgorithm,
    /// No certificate or key material could be located for a key spec.
    #[display(fmt = "key resolution failure")]
    KeyResolution,
    /// Canonical output does not begin with `<` or end with `>`.
    #[display(fmt = "canonical framing violation")]
    Framing,
    /// Reconstructed padded block differs from the decrypted signature value.
    #[display(fmt = "signature verification failure")]
    Verification,
    /// Structurally invalid XML or signature element.
    #[display(fmt = "malformed document")]
    Malformed,
    #[display(fmt = "io error")]
    Io,
    #[display(fmt = "crypto error")]
    Crypto,
}

/// The one error type every public operation returns.
#[derive(Debug, Display, Error)]
#[display(fmt = "{}: {}", kind, message)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn bad_reference(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::BadReference, message)
    }

    pub(crate) fn missing_method(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::MissingMethod, message)
    }

    pub(crate) fn unknown_transform(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnknownTransform, message)
    }

    pub(crate) fn unknown_algorithm(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnknownAlgorithm, message)
    }

    pub(crate) fn key_resolution(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::KeyResolution, message)
    }

    pub(crate) fn framing(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Framing, message)
    }

    pub(crate) fn verification(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Verification, message)
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Malformed, message)
    }

    pub(crate) fn io(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Io, message)
    }

    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Crypto, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::malformed(format!("xml parse error: {}", err))
    }
}
