// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Error kinds surfaced by the core, per the error taxonomy in the
//! `EXTERNAL INTERFACES` / `ERROR HANDLING DESIGN` sections.
//!
//! `NotFound` is intentionally absent from this enum: read paths return
//! `Ok(None)` when a key is provably absent (including provably covered by a
//! range tombstone), matching how the teacher crate distinguishes "no error,
//! no value" from an actual failure.

/// Errors that can occur while operating the core.
#[derive(Debug)]
pub enum Error {
    /// I/O error from an external collaborator (log writer, manifest, table reader).
    Io(std::io::Error),

    /// Data did not parse as expected: an unparsable internal key, a corrupt
    /// manifest record, or a fragmenter input that could not be decoded.
    ///
    /// Per §7, corruption is sticky: the containing iterator or version-edit
    /// operation becomes invalid and must not silently succeed.
    Corruption(String),

    /// A caller-supplied argument violated a documented precondition.
    InvalidArgument(String),

    /// A `Merge` operand chain has not yet been resolved to a final value.
    MergeInProgress,

    /// An operation could not complete all of its work (e.g. a bounded scan
    /// stopped early); the caller may retry with adjusted bounds.
    Incomplete,

    /// Asynchronous I/O (e.g. secondary-cache or child-iterator readahead) has
    /// not completed; reissue after draining outstanding handles.
    TryAgain,

    /// The requested operation is not implemented by this collaborator.
    NotSupported(String),

    /// The resource is transiently unavailable (e.g. a strict-capacity cache is full).
    Busy,

    /// The column family this memtable/version belongs to was dropped
    /// concurrently with the operation.
    ColumnFamilyDropped,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::MergeInProgress => write!(f, "merge operands not yet resolved"),
            Self::Incomplete => write!(f, "operation incomplete"),
            Self::TryAgain => write!(f, "try again"),
            Self::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Self::Busy => write!(f, "busy"),
            Self::ColumnFamilyDropped => write!(f, "column family dropped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Core result type.
pub type Result<T> = std::result::Result<T, Error>;
