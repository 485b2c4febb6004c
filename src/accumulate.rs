//! Volumetric accumulation of slice samples
//!
//! Every live slice is shifted by +1, resampled into the target grid and
//! compared against the fill value 0. A target voxel is struck when the
//! resampled value is strictly positive; it then receives the original
//! intensity in the numerator and a count of one in the denominator. The +1
//! shift lets a zero-valued pixel inside the footprint be told apart from
//! "outside the footprint".
//!
//! Slices of one stack are accumulated in parallel into partial pairs which
//! are summed afterwards, so the result does not depend on slice order.

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::geometry::Grid;
use crate::resample::{ResampledImage, SliceResampler};
use crate::stack::{SliceSource, Stack};

/// Offset added to every source pixel before resampling
pub const SOURCE_OFFSET: f64 = 1.0;

/// Fill value for target voxels outside a slice footprint
pub const FILL_VALUE: f64 = 0.0;

/// Numerator and denominator volumes of one reconstruction pass
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulationPair {
    /// Sum of sample intensities per voxel
    pub numerator: Vec<f64>,
    /// Number of samples per voxel
    pub denominator: Vec<f64>,
}

impl AccumulationPair {
    /// Zero-initialised pair for `n_total` voxels
    pub fn zeros(n_total: usize) -> Self {
        Self {
            numerator: vec![0.0; n_total],
            denominator: vec![0.0; n_total],
        }
    }

    pub fn len(&self) -> usize {
        self.numerator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numerator.is_empty()
    }

    /// Add one resampled, offset slice
    ///
    /// Only voxels strictly above the fill value count as samples.
    pub fn add_resampled(&mut self, image: &ResampledImage) {
        for &(idx, v) in &image.voxels {
            if v > image.fill_value {
                self.numerator[idx] += v - SOURCE_OFFSET;
                self.denominator[idx] += 1.0;
            }
        }
    }

    /// Voxel-wise sum of two partial pairs
    pub fn merge(mut self, other: &AccumulationPair) -> Self {
        for (a, b) in self.numerator.iter_mut().zip(&other.numerator) {
            *a += b;
        }
        for (a, b) in self.denominator.iter_mut().zip(&other.denominator) {
            *a += b;
        }
        self
    }

    /// Force zero denominator entries to one
    ///
    /// # Returns
    /// Per-voxel flags marking the voxels that had no sample
    pub fn guard_zero_denominator(&mut self) -> Vec<bool> {
        self.denominator
            .iter_mut()
            .map(|d| {
                if *d == 0.0 {
                    *d = 1.0;
                    true
                } else {
                    false
                }
            })
            .collect()
    }

    /// Number of voxels hit by at least one sample
    pub fn sampled_count(&self) -> usize {
        self.denominator.iter().filter(|&&d| d > 0.0).count()
    }
}

/// Accumulate all live slices of all stacks into the target grid
///
/// # Arguments
/// * `stacks` - Input stacks; only live slices are read
/// * `grid` - Target grid
/// * `source` - Which per-slice signal to accumulate
/// * `resampler` - Slice-to-grid resampler
///
/// # Returns
/// The accumulation pair before the zero guard
pub fn accumulate(
    stacks: &[Stack],
    grid: &Grid,
    source: SliceSource,
    resampler: &dyn SliceResampler,
) -> Result<AccumulationPair> {
    accumulate_with_progress(stacks, grid, source, resampler, |_, _| {})
}

/// Accumulate with a progress callback invoked after each stack
///
/// The callback receives `(stacks_done, stacks_total)`.
pub fn accumulate_with_progress<F>(
    stacks: &[Stack],
    grid: &Grid,
    source: SliceSource,
    resampler: &dyn SliceResampler,
    mut progress_callback: F,
) -> Result<AccumulationPair>
where
    F: FnMut(usize, usize),
{
    grid.validate()?;
    let n_total = grid.n_total();
    let n_stacks = stacks.len();
    let mut total = AccumulationPair::zeros(n_total);

    // Bound the number of partial volumes to roughly one per worker
    let n_threads = rayon::current_num_threads().max(1);

    for (i, stack) in stacks.iter().enumerate() {
        let slices = stack.slices();
        let min_len = slices.len().div_ceil(n_threads).max(1);

        let partial = slices
            .par_iter()
            .with_min_len(min_len)
            .fold(
                || AccumulationPair::zeros(n_total),
                |mut acc, slice| {
                    let mut values = slice.source_values(source);
                    for v in values.iter_mut() {
                        *v += SOURCE_OFFSET;
                    }
                    let image = resampler.resample(&values, &slice.grid(), grid, FILL_VALUE);
                    acc.add_resampled(&image);
                    acc
                },
            )
            .reduce(|| AccumulationPair::zeros(n_total), |a, b| a.merge(&b));

        total = total.merge(&partial);
        debug!(
            stack = stack.name(),
            slices = slices.len(),
            sampled_voxels = partial.sampled_count(),
            "Accumulated stack"
        );
        progress_callback(i + 1, n_stacks);
    }

    Ok(total)
}
