//
// error.rs
// Dicom-Courier-rs
//
// Typed errors for each layer plus the closed taxonomy of delivery failure kinds.
//
// Dicom-Courier-rs contributors - October 2026

use std::fmt;
use std::path::PathBuf;

use dicom::core::{Tag, VR};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Status;

/// Failures raised while encoding or decoding single elements and file segments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("value of {tag} is {len} bytes, not compatible with VR {vr} ({reason})")]
    InvalidVrLength {
        tag: Tag,
        vr: VR,
        len: usize,
        reason: &'static str,
    },
    #[error("stream truncated: needed {needed} bytes, {available} available")]
    TruncatedStream { needed: usize, available: usize },
    #[error("declared length {declared} of {tag} exceeds the {remaining} remaining bytes")]
    LengthOverflow {
        tag: Tag,
        declared: u32,
        remaining: usize,
    },
    #[error("unknown VR bytes {bytes:02X?} for {tag}")]
    UnknownVr { tag: Tag, bytes: [u8; 2] },
    #[error("undefined length is only supported for pixel data, found on {tag}")]
    UndefinedLength { tag: Tag },
    #[error("missing DICM magic after the preamble")]
    MissingMagic,
    #[error("expected an item inside encapsulated pixel data, found {tag}")]
    UnexpectedItem { tag: Tag },
    #[error("dataset has no pixel data element")]
    MissingPixelData,
    #[error("unsupported transfer syntax `{0}`")]
    UnsupportedTransferSyntax(String),
}

/// Failures from the identifier generator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UidError {
    #[error("UID root `{0}` must be dotted numeric without leading zeros")]
    InvalidRoot(String),
    #[error("generated UID `{0}` exceeds 64 characters")]
    TooLong(String),
}

/// Failures raised while assembling a capture dataset into a file.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid image dimensions {rows}x{columns} with {samples_per_pixel} sample(s) per pixel")]
    InvalidDimensions {
        rows: u32,
        columns: u32,
        samples_per_pixel: u16,
    },
    #[error("pixel buffer is {actual} bytes, expected {expected}")]
    PixelSizeMismatch { expected: usize, actual: usize },
    #[error("unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),
    #[error("photometric interpretation {photometric} cannot be paired with {transfer_syntax} and {samples_per_pixel} sample(s)")]
    InconsistentPhotometricInterpretation {
        photometric: String,
        transfer_syntax: String,
        samples_per_pixel: u16,
    },
    #[error("invalid bit depth: {bits_stored} bits stored in {bits_allocated} allocated")]
    InvalidBitDepth { bits_allocated: u16, bits_stored: u16 },
    #[error("birth date `{0}` must be empty or YYYYMMDD")]
    InvalidBirthDate(String),
    #[error("patient sex `{0}` must be empty, M, F or O")]
    InvalidSex(String),
    #[error("encapsulated pixel data needs at least one fragment")]
    EmptyEncapsulatedPayload,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Uid(#[from] UidError),
    #[error("failed to write output file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the synchronous queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("queue is full ({count} items)")]
    QueueFull { count: usize },
    #[error("queue item not found: {0}")]
    ItemNotFound(String),
    #[error("cannot {operation} item {id} while it is {status}")]
    InvalidState {
        id: String,
        status: Status,
        operation: &'static str,
    },
    #[error("queue snapshot {0} is in use by another process")]
    Locked(PathBuf),
    #[error("failed to persist queue snapshot: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("queue snapshot is malformed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Failures reading or writing the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown patient template `{0}`")]
    UnknownTemplate(String),
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("relative birth date `{0}` must look like TODAY-40Y, TODAY-6M or TODAY-10D")]
    InvalidRelativeDate(String),
}

/// Closed set of reasons a delivery attempt can fail.
///
/// The kind is decided where the failure happens and is persisted with the
/// queue item, so it must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceNotFound,
    NetworkError,
    Timeout,
    AuthenticationFailed,
    RejectedByDestination,
    ResourceExhausted,
    Unknown,
}

impl ErrorKind {
    /// Whether the queue may re-attempt an item that failed with this kind.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::SourceNotFound
                | ErrorKind::AuthenticationFailed
                | ErrorKind::RejectedByDestination
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SourceNotFound => "source_not_found",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::RejectedByDestination => "rejected_by_destination",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
