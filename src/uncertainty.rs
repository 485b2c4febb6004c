//! Confidence maps derived from the slice-count field
//!
//! The smoothed denominator approximates how many slice samples support each
//! voxel. Two maps are derived from it inside the region of interest:
//!
//! - raw: the smoothed count rounded to the nearest integer (ties to even)
//! - normalized: `stack_count - clamp(count, 0, stack_count) + 1`, truncated to
//!   an integer in `[1, stack_count]`; small values mean high confidence
//!
//! Voxels outside the mask are 0 in both maps.

use tracing::{debug, info};

use crate::accumulate::accumulate;
use crate::error::{Result, SdaError};
use crate::geometry::Grid;
use crate::resample::SliceResampler;
use crate::smoothing::RecursiveGaussian;
use crate::stack::{SliceSource, Stack};

/// Raw and normalized uncertainty volumes on the reconstruction grid
#[derive(Clone, Debug)]
pub struct UncertaintyMaps {
    /// Geometry shared with the reconstruction mask
    pub grid: Grid,
    /// Rounded smoothed slice count inside the mask
    pub raw: Vec<f64>,
    /// Inverted, stack-normalised slice count inside the mask
    pub normalized: Vec<u8>,
    /// Number of stacks used for normalisation
    pub stack_count: usize,
}

/// Recompute the denominator and derive both uncertainty maps
///
/// # Arguments
/// * `stacks` - Stacks of the reconstruction
/// * `grid` - Reconstruction grid
/// * `mask` - Region of interest (grid.n_total())
/// * `source` - Slice signal used by the reconstruction
/// * `resampler` - Slice-to-grid resampler
/// * `filter` - Recursive Gaussian used to smooth the count field
/// * `sigma` - Smoothing sigma per axis in mm
pub fn compute_uncertainty_maps(
    stacks: &[Stack],
    grid: &Grid,
    mask: &[u8],
    source: SliceSource,
    resampler: &dyn SliceResampler,
    filter: &dyn RecursiveGaussian,
    sigma: [f64; 3],
) -> Result<UncertaintyMaps> {
    SdaError::check_len("uncertainty mask", grid.n_total(), mask.len())?;
    info!(stacks = stacks.len(), filter = filter.name(), "Generating uncertainty maps");

    let mut pair = accumulate(stacks, grid, source, resampler)?;
    pair.guard_zero_denominator();
    let smoothed = filter.smooth(&pair.denominator, grid, sigma);

    uncertainty_from_denominator(&smoothed, mask, stacks.len(), grid)
}

/// Derive both maps from an already smoothed denominator
pub fn uncertainty_from_denominator(
    denominator: &[f64],
    mask: &[u8],
    stack_count: usize,
    grid: &Grid,
) -> Result<UncertaintyMaps> {
    let n_total = grid.n_total();
    SdaError::check_len("denominator", n_total, denominator.len())?;
    SdaError::check_len("uncertainty mask", n_total, mask.len())?;

    let n = stack_count as f64;
    let upper = n.max(1.0).min(u8::MAX as f64);

    let mut raw = vec![0.0; n_total];
    let mut normalized = vec![0u8; n_total];
    for i in 0..n_total {
        if mask[i] == 0 {
            continue;
        }
        let d = denominator[i];
        raw[i] = d.round_ties_even();
        normalized[i] = (n - d.clamp(0.0, n) + 1.0).floor().clamp(1.0, upper) as u8;
    }

    debug!(
        inside_mask = mask.iter().filter(|&&m| m > 0).count(),
        max_raw = raw.iter().cloned().fold(0.0, f64::max),
        "Uncertainty maps ready"
    );

    Ok(UncertaintyMaps {
        grid: grid.clone(),
        raw,
        normalized,
        stack_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn grid(n: usize) -> Grid {
        Grid::new((n, 1, 1), (1.0, 1.0, 1.0), DVec3::ZERO)
    }

    #[test]
    fn test_raw_rounding_and_mask() {
        let d = vec![0.4, 1.5, 2.5, 3.6, 7.0];
        let mask = vec![1, 1, 1, 1, 0];
        let maps = uncertainty_from_denominator(&d, &mask, 3, &grid(5)).unwrap();
        assert_eq!(maps.raw, vec![0.0, 2.0, 2.0, 4.0, 0.0]);
    }

    #[test]
    fn test_normalized_bounds() {
        let d = vec![0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 10.0, 2.0];
        let mask = vec![1, 1, 1, 1, 1, 1, 1, 0];
        let maps = uncertainty_from_denominator(&d, &mask, 3, &grid(8)).unwrap();
        assert_eq!(maps.normalized, vec![3, 3, 3, 2, 2, 1, 1, 0]);
    }

    #[test]
    fn test_normalized_non_increasing_in_count() {
        let d: Vec<f64> = (0..50).map(|i| i as f64 * 0.2).collect();
        let maps = uncertainty_from_denominator(&d, &vec![1; 50], 5, &grid(50)).unwrap();
        for w in maps.normalized.windows(2) {
            assert!(w[1] <= w[0]);
        }
        assert!(maps.normalized.iter().all(|&v| (1..=5).contains(&v)));
    }

    #[test]
    fn test_zero_stacks() {
        let maps = uncertainty_from_denominator(&[1.0, 1.0], &[1, 0], 0, &grid(2)).unwrap();
        assert_eq!(maps.normalized, vec![1, 0]);
        assert_eq!(maps.raw, vec![1.0, 0.0]);
    }

    #[test]
    fn test_length_checked() {
        assert!(uncertainty_from_denominator(&[1.0], &[1, 1], 1, &grid(2)).is_err());
    }
}
