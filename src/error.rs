//! Error types for mpw.
//!
//! Every variant is a distinct failure mode of derivation, rendering or
//! marshaling. Messages are intentionally minimal: they say *what* failed
//! and never carry secret material (passwords, keys, rendered results or
//! stored content).

use std::fmt;

use crate::algorithm::Algorithm;

/// A single record of a vault file that could not be parsed.
///
/// Collected per line during import instead of aborting the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    /// 1-based line number (flat format) or 1-based site index (JSON format).
    pub line: usize,
    /// Short, non-secret description of the problem.
    pub reason: String,
}

impl MalformedRecord {
    pub(crate) fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// The single error type for all mpw operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpwError {
    /// The key-stretching function could not run (resource exhaustion or
    /// unusable cost parameters). Never caused by password content.
    KeyDerivation,

    /// An identifier was empty or malformed, or a counter value is reserved.
    InvalidParameter(String),

    /// The algorithm version is not part of the version table.
    UnsupportedAlgorithm(u32),

    /// The numeric result type is unknown.
    UnsupportedResultType(u32),

    /// A template needs more key bytes than the site key provides.
    TemplateOverflow,

    /// The key provider holds no master key for the requested algorithm.
    KeyUnavailable(Algorithm),

    /// The master key does not match the identity's recorded key ID.
    KeyIdMismatch,

    /// Sealing stored content failed.
    Encryption,

    /// Opening stored content failed: wrong key, tampered ciphertext or a
    /// corrupted authentication tag.
    Decryption,

    /// The system's random number generator failed to produce bytes.
    Randomness,

    /// The vault header is missing or structurally invalid.
    MalformedHeader(String),

    /// The vault declares a format this codec cannot read.
    UnsupportedFormat(String),

    /// A single vault record could not be parsed.
    MalformedRecord(MalformedRecord),

    /// The vault was not produced under the supplied master key.
    ChecksumMismatch,
}

impl fmt::Display for MpwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyDerivation => write!(f, "key derivation failed"),
            Self::InvalidParameter(what) => write!(f, "invalid parameter: {}", what),
            Self::UnsupportedAlgorithm(version) => {
                write!(f, "unsupported algorithm version: {}", version)
            }
            Self::UnsupportedResultType(value) => write!(f, "unsupported result type: {}", value),
            Self::TemplateOverflow => write!(f, "template exceeds available key material"),
            Self::KeyUnavailable(algorithm) => {
                write!(f, "no master key available for algorithm {}", algorithm)
            }
            Self::KeyIdMismatch => write!(f, "master key does not match the user's key ID"),
            Self::Encryption => write!(f, "encryption failed"),
            Self::Decryption => write!(f, "decryption failed"),
            Self::Randomness => write!(f, "randomness source failed"),
            Self::MalformedHeader(reason) => write!(f, "malformed vault header: {}", reason),
            Self::UnsupportedFormat(format) => write!(f, "unsupported vault format: {}", format),
            Self::MalformedRecord(record) => write!(f, "malformed record: {}", record),
            Self::ChecksumMismatch => write!(f, "vault checksum mismatch"),
        }
    }
}

impl std::error::Error for MpwError {}

impl From<MalformedRecord> for MpwError {
    fn from(record: MalformedRecord) -> Self {
        Self::MalformedRecord(record)
    }
}
