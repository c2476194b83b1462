//! Error types raised by the descriptor/directory parser and the queue core.
//!
//! See spec §7: `ConfigError` covers recoverable parse/validation failures,
//! `CryptoError` is folded into `ConfigError::InvalidSignature` at the
//! descriptor layer, `MixError` is a logic error against the public API, and
//! `MixFatalError` denotes an unrecoverable storage inconsistency.

use std::path::PathBuf;

/// A recoverable failure parsing or validating a descriptor/directory.
///
/// No partially-constructed descriptor or directory ever escapes a
/// `ConfigError`: callers only ever see `Ok(fully-validated)` or `Err`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unrecognized descriptor version: {0}")]
    UnrecognizedDescriptorVersion(String),

    #[error("unrecognized directory version")]
    UnrecognizedDirectoryVersion,

    #[error("missing required field {section}.{key}")]
    MissingField { section: String, key: String },

    #[error("malformed value for {section}.{key}: {reason}")]
    MalformedValue {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid digest")]
    InvalidDigest,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signed digest is incorrect")]
    SignedDigestIncorrect,

    #[error("invalid length on identity key")]
    InvalidIdentityKeyLength,

    #[error("invalid length on packet key")]
    InvalidPacketKeyLength,

    #[error("server published in the future")]
    PublishedInFuture,

    #[error("directory published in the future")]
    DirectoryPublishedInFuture,

    #[error("server is never valid")]
    ServerNeverValid,

    #[error("directory is never valid")]
    DirectoryNeverValid,

    #[error("contact too long")]
    ContactTooLong,

    #[error("comments too long")]
    CommentsTooLong,

    #[error("contact-fingerprint too long")]
    ContactFingerprintTooLong,

    #[error("invalid key digest {0}")]
    InvalidKeyDigest(String),

    #[error("key-digest does not match recomputed digest of identity key")]
    KeyDigestMismatch,

    #[error("Incoming/MMTP section has neither IP nor hostname")]
    IncomingMmtpMissingAddress,

    #[error("unrecognized MMTP descriptor version {0}")]
    UnrecognizedMmtpVersion(String),

    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("parse error: {0}")]
    Parse(String),
}

/// Raised by the crypto collaborator; always folded into
/// [`ConfigError::InvalidSignature`] by callers in this crate (spec §7).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed key: {0}")]
    MalformedKey(String),
}

impl From<CryptoError> for ConfigError {
    fn from(_: CryptoError) -> Self {
        ConfigError::InvalidSignature
    }
}

/// A logic error against the public API (e.g. calling `queue_message` on a
/// `DeliveryQueue`), distinct from a recoverable `ConfigError`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MixError {
    #[error("{0}")]
    Generic(String),
}

/// An unrecoverable storage inconsistency. Spec §7: "Terminates the
/// process." This crate never calls `std::process::exit` itself; it is the
/// caller's responsibility to treat this as fatal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MixFatalError {
    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("metadata file for handle {handle} is in an unrecognized format")]
    UnrecognizedMetadataFormat { handle: String },
}
