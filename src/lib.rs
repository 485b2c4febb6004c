//! SDA-Core: Scattered data approximation volume reconstruction
//!
//! This crate reconstructs a 3D volume from oriented, possibly overlapping 2D
//! slices (e.g. stacks of motion-corrected MRI slices) with a discrete
//! Shepard-like scattered data approximation.
//!
//! # Modules
//! - `geometry`: Grids, rigid poses, Fortran-order indexing
//! - `volume`: Target volume with intensity and mask fields
//! - `stack`: Slices, stacks, slice deletion and dead-stack removal
//! - `resample`: Nearest-neighbour slice-to-grid resampling
//! - `accumulate`: Numerator/denominator accumulation
//! - `smoothing`: Recursive Gaussian filters (YVV, Deriche)
//! - `uncertainty`: Confidence maps from the slice-count field
//! - `sda`: Reconstruction engine and parameters
//! - `utils`: Mask dilation, joint masks, thresholding
//! - `nifti_io`: NIfTI-1 read/write

// Core modules
pub mod error;
pub mod geometry;
pub mod volume;
pub mod stack;

// Algorithm modules
pub mod resample;
pub mod accumulate;
pub mod smoothing;
pub mod uncertainty;
pub mod sda;
pub mod utils;

// I/O modules
pub mod nifti_io;

pub use error::{Result, SdaError};
pub use geometry::{idx3d, Grid, RigidTransform};
pub use sda::{ScatteredDataApproximation, SdaParams, Sigma, UnsampledPolicy};
pub use smoothing::{RecursiveGaussian, SmoothingApproach};
pub use stack::{remove_dead_stacks, Slice, SliceSource, Stack};
pub use uncertainty::UncertaintyMaps;
pub use volume::Volume;
