//! Binary masks from continuous volumes
//!
//! A reconstructed mask volume is a smooth field in roughly [0, 1]. The
//! [`MaskEstimator`] trait turns it into a binary mask on the same grid;
//! [`ThresholdMaskEstimator`] does this with either a fixed threshold or
//! Otsu's automatic threshold.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Grid;

/// Turns a float volume into a binary mask of the same geometry
pub trait MaskEstimator: Send + Sync {
    /// # Arguments
    /// * `data` - Float volume (grid.n_total())
    /// * `grid` - Volume geometry
    ///
    /// # Returns
    /// Binary mask (0 or 1) with one entry per voxel
    fn estimate(&self, data: &[f64], grid: &Grid) -> Vec<u8>;
}

/// How the threshold is chosen
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ThresholdMethod {
    /// Fixed value; voxels strictly above it are foreground
    Fixed(f64),
    /// Otsu's method on a histogram with the given number of bins
    Otsu { num_bins: usize },
}

/// Threshold-based mask estimator
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMaskEstimator {
    pub method: ThresholdMethod,
}

impl Default for ThresholdMaskEstimator {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Fixed(0.5),
        }
    }
}

impl ThresholdMaskEstimator {
    pub fn fixed(threshold: f64) -> Self {
        Self {
            method: ThresholdMethod::Fixed(threshold),
        }
    }

    pub fn otsu() -> Self {
        Self {
            method: ThresholdMethod::Otsu { num_bins: 256 },
        }
    }

    /// Threshold this estimator applies to `data`
    pub fn threshold(&self, data: &[f64]) -> f64 {
        match self.method {
            ThresholdMethod::Fixed(t) => t,
            ThresholdMethod::Otsu { num_bins } => otsu_threshold(data, num_bins),
        }
    }
}

impl MaskEstimator for ThresholdMaskEstimator {
    fn estimate(&self, data: &[f64], _grid: &Grid) -> Vec<u8> {
        let threshold = self.threshold(data);
        let mask: Vec<u8> = data.iter().map(|&v| u8::from(v > threshold)).collect();
        debug!(
            threshold,
            foreground = mask.iter().filter(|&&m| m > 0).count(),
            "Estimated binary mask"
        );
        mask
    }
}

/// Otsu's method for automatic threshold selection
///
/// Picks the histogram split that maximizes the between-class variance.
/// The histogram spans the full data range (zeros included) and the result
/// is the upper edge of the last background bin, so `v > threshold` selects
/// the foreground class.
///
/// # Arguments
/// * `data` - Input data (e.g. flattened 3D image)
/// * `num_bins` - Number of histogram bins (typically 256)
///
/// # Returns
/// The optimal threshold value
pub fn otsu_threshold(data: &[f64], num_bins: usize) -> f64 {
    let num_bins = num_bins.max(2);
    let finite = || data.iter().copied().filter(|v| v.is_finite());

    let Some(min_val) = finite().reduce(f64::min) else {
        return 0.0;
    };
    let max_val = finite().fold(min_val, f64::max);
    if max_val - min_val < 1e-10 {
        return min_val;
    }

    let bin_width = (max_val - min_val) / num_bins as f64;
    let mut histogram = vec![0usize; num_bins];
    for v in finite() {
        let bin = (((v - min_val) / bin_width).floor() as usize).min(num_bins - 1);
        histogram[bin] += 1;
    }

    let total = histogram.iter().sum::<usize>() as f64;
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut weight_bg = 0.0;
    let mut sum_bg = 0.0;
    let mut best = (0.0, 0usize);
    for (t, &c) in histogram.iter().enumerate() {
        weight_bg += c as f64;
        sum_bg += t as f64 * c as f64;
        let weight_fg = total - weight_bg;
        if weight_bg == 0.0 {
            continue;
        }
        if weight_fg == 0.0 {
            break;
        }
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (weighted_total - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > best.0 {
            best = (variance, t);
        }
    }

    min_val + (best.1 + 1) as f64 * bin_width
}
