// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for Grand-Convergence validation, compute, and output.
//!
//! All boundary validation and runtime failures use [`Error`], with one
//! variant per failure kind. No external error crates — zero-dependency
//! error type. Each kind maps onto a process exit code via
//! [`Error::exit_code`].

use std::fmt;
use std::path::PathBuf;

/// Errors produced by Grand-Convergence components.
#[derive(Debug)]
pub enum Error {
    /// File I/O error with path context.
    Io {
        /// Path that caused the error.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Malformed tree, non-finite probabilities, mismatched offsets,
    /// or an otherwise invalid upstream input.
    InvalidInput(String),
    /// A user-requested branch pair that is out of range, references the
    /// root, or is not independent. Carries the offending pair.
    InvalidBranchPairSelection {
        /// The offending pair, after canonicalization to `u < v`.
        pair: (usize, usize),
        /// Why the pair was rejected.
        reason: String,
    },
    /// Theil-Sen produced no usable slopes, or a median index fell
    /// outside the collected slope vector.
    NumericDegeneracy(String),
    /// A requested compute backend is not present on this machine.
    BackendUnavailable(String),
    /// Device error during kernel launch or host/device copy.
    BackendRuntime {
        /// Backend that failed ("CPU", "CUDA", "Metal").
        backend: &'static str,
        /// What went wrong.
        message: String,
    },
    /// Allocation failure on host or device.
    ResourceExhaustion(String),
}

/// Result type alias for Grand-Convergence operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this error kind.
    ///
    /// `1` input validation, `2` I/O, `3` backend failure,
    /// `4` numeric degeneracy.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) | Self::InvalidBranchPairSelection { .. } => 1,
            Self::Io { .. } => 2,
            Self::BackendUnavailable(_)
            | Self::BackendRuntime { .. }
            | Self::ResourceExhaustion(_) => 3,
            Self::NumericDegeneracy(_) => 4,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::InvalidBranchPairSelection { pair, reason } => {
                write!(
                    f,
                    "invalid branch pair ({}, {}): {reason}",
                    pair.0, pair.1
                )
            }
            Self::NumericDegeneracy(msg) => write!(f, "numeric degeneracy: {msg}"),
            Self::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            Self::BackendRuntime { backend, message } => {
                write!(f, "{backend} backend error: {message}")
            }
            Self::ResourceExhaustion(msg) => write!(f, "resource exhaustion: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_io_error() {
        let err = Error::Io {
            path: PathBuf::from("out/UI/User/resultsData.js"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("resultsData.js"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn display_selection_error_carries_pair() {
        let err = Error::InvalidBranchPairSelection {
            pair: (3, 7),
            reason: "node 3 is an ancestor of node 7".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("(3, 7)"));
        assert!(msg.contains("ancestor"));
    }

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(Error::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            Error::InvalidBranchPairSelection {
                pair: (0, 1),
                reason: "x".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            Error::Io {
                path: PathBuf::from("x"),
                source: std::io::Error::other("inner"),
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::BackendUnavailable("x".into()).exit_code(), 3);
        assert_eq!(
            Error::BackendRuntime {
                backend: "CUDA",
                message: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(Error::ResourceExhaustion("x".into()).exit_code(), 3);
        assert_eq!(Error::NumericDegeneracy("x".into()).exit_code(), 4);
    }

    #[test]
    fn error_source_chain() {
        let io_err = Error::Io {
            path: PathBuf::from("x"),
            source: std::io::Error::other("inner"),
        };
        assert!(std::error::Error::source(&io_err).is_some());
        assert!(std::error::Error::source(&Error::InvalidInput("x".into())).is_none());
    }
}
