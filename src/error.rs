//! Error types for scattered data approximation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SdaError>;

/// Errors that can occur while configuring or running a reconstruction.
#[derive(Debug, Error)]
pub enum SdaError {
    #[error("Sigma array must contain 3 elements, got {len}")]
    SigmaLength { len: usize },

    #[error("Sigma along axis {axis} must be finite and non-negative, got {value}")]
    InvalidSigma { axis: usize, value: f64 },

    #[error("Unknown SDA approach '{0}', expected 'Shepard-YVV' or 'Shepard-Deriche'")]
    UnknownApproach(String),

    #[error("Unknown structuring element '{0}', expected Ball, Box, Cross or Annulus")]
    UnknownKernel(String),

    #[error("Invalid grid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Buffer length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("NIfTI error: {0}")]
    Nifti(String),
}

impl SdaError {
    /// Check a flat buffer against the expected voxel count.
    pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(SdaError::LengthMismatch { what, expected, actual })
        }
    }
}
