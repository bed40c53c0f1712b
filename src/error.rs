//! Possible errors when manipulating bags and deposits

use crate::{Algorithm, Checksum};
use std::path::PathBuf;

pub use crate::checksum::ChecksumComputeError;
pub use crate::download::FetchError;
pub use crate::metadata::MetadataError;

#[derive(Debug, Clone, PartialEq)]
/// Digest of a file not matching what a manifest declares for it
pub struct Mismatch {
    /// Algorithm of the manifest
    pub algorithm: Algorithm,
    /// Absolute path of the file
    pub path: PathBuf,
    /// Checksum listed in the manifest
    pub expected: Checksum,
    /// Checksum of the content
    pub actual: Checksum,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of `{}`: expected {}, got {}",
            self.algorithm,
            self.path.display(),
            self.expected,
            self.actual
        )
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
/// Failures of bag operations
///
/// Expected violations found while verifying a bag are not errors, see [`crate::Violation`].
pub enum BagError {
    /// Destination of an add is already taken, on disk or as a fetch target
    #[error("{what} already exists: `{path}`")]
    AlreadyExists {
        /// Kind of thing, like `payload file`
        what: &'static str,
        /// Taken destination
        path: PathBuf,
    },
    /// Referenced file, fetch item or algorithm is absent
    #[error("{what} not found: `{name}`")]
    NotFound {
        /// Kind of thing, like `fetch item`
        what: &'static str,
        /// Path or name that was looked up
        name: String,
    },
    /// Unsafe path, disallowed url, directory instead of file, malformed stored value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Fetched content differs from the manifests, one entry per mismatching algorithm
    #[error("Checksum mismatch: {}", display_mismatches(.0))]
    ChecksumMismatch(Vec<Mismatch>),
    /// Bag structure does not allow the operation
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// See [`FetchError`]
    #[error("Failed to fetch: {0}")]
    Fetch(#[from] FetchError),
    /// See [`ChecksumComputeError`]
    #[error("Failed to compute checksum of `{path}`: {source}")]
    ComputeChecksum {
        /// Hashed file
        path: PathBuf,
        /// Cause
        source: ChecksumComputeError,
    },
    /// See [`MetadataError`]
    #[error("Invalid tag file `{path}`: {source}")]
    Metadata {
        /// Offending tag file
        path: PathBuf,
        /// Cause
        source: MetadataError,
    },
    /// Deposit properties could not be saved or read
    #[error("Failed to handle deposit properties `{path}`: {message}")]
    Properties {
        /// Properties file
        path: PathBuf,
        /// Description of the failure
        message: String,
    },
    /// Filesystem operation failed
    #[error("I/O failure on `{path}`: {kind}")]
    Io {
        /// File or directory operated on
        path: PathBuf,
        /// Kind of the I/O error
        kind: std::io::ErrorKind,
    },
}

fn display_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(Mismatch::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BagError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |e| BagError::Io {
            path,
            kind: e.kind(),
        }
    }

    pub(crate) fn checksum(path: impl Into<PathBuf>) -> impl FnOnce(ChecksumComputeError) -> Self {
        let path = path.into();
        move |source| BagError::ComputeChecksum { path, source }
    }

    pub(crate) fn already_exists(what: &'static str, path: impl Into<PathBuf>) -> Self {
        BagError::AlreadyExists {
            what,
            path: path.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, name: impl ToString) -> Self {
        BagError::NotFound {
            what,
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        BagError::InvalidArgument(reason.into())
    }
}
