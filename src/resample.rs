//! Resampling of slice images into a target grid
//!
//! The resampler visits every target voxel whose centre may fall inside the
//! source footprint, maps it into the source image and picks the nearest
//! source pixel. Target voxels outside the footprint keep the fill value. Only
//! the visited voxels are stored, so a thin slice resampled into a large grid
//! stays cheap.

use glam::DVec3;

use crate::geometry::{idx3d, Grid};

/// Result of resampling one image into a target grid
///
/// Voxels not listed in `voxels` hold `fill_value`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResampledImage {
    /// Number of voxels of the target grid
    pub n_total: usize,
    /// Value of every voxel outside the source footprint
    pub fill_value: f64,
    /// (linear target index, value) for voxels inside the footprint
    pub voxels: Vec<(usize, f64)>,
}

impl ResampledImage {
    /// Expand to a dense array over the target grid
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![self.fill_value; self.n_total];
        for &(idx, v) in &self.voxels {
            dense[idx] = v;
        }
        dense
    }
}

/// Maps an image defined on `source` into the `target` grid
///
/// Implementations must be deterministic: identical inputs give identical output.
pub trait SliceResampler: Send + Sync {
    /// # Arguments
    /// * `values` - Source image (source.n_total()), Fortran order
    /// * `source` - Geometry of the source image
    /// * `target` - Geometry to resample into
    /// * `fill_value` - Value for target voxels outside the source footprint
    fn resample(&self, values: &[f64], source: &Grid, target: &Grid, fill_value: f64) -> ResampledImage;
}

/// Nearest-neighbour resampling with the identity transform between grids
///
/// A target voxel lies inside the source when its continuous source index is
/// within `[-0.5, n - 0.5)` along every axis; the nearest pixel is then
/// `floor(index + 0.5)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestNeighborResampler;

impl SliceResampler for NearestNeighborResampler {
    fn resample(&self, values: &[f64], source: &Grid, target: &Grid, fill_value: f64) -> ResampledImage {
        let (sx, sy, sz) = source.dims;
        let (tx, ty, tz) = target.dims;

        // Affine map from target index to continuous source index
        let source_inv = source.index_to_world_matrix().inverse();
        let linear = source_inv * target.index_to_world_matrix();
        let offset = source_inv * (target.origin - source.origin);

        let mut voxels = Vec::new();
        let Some(((i0, i1), (j0, j1), (k0, k1))) = footprint_bounds(source, target) else {
            return ResampledImage {
                n_total: target.n_total(),
                fill_value,
                voxels,
            };
        };

        let upper = DVec3::new(sx as f64 - 0.5, sy as f64 - 0.5, sz as f64 - 0.5);

        for k in k0..=k1 {
            for j in j0..=j1 {
                for i in i0..=i1 {
                    let c = linear * DVec3::new(i as f64, j as f64, k as f64) + offset;
                    if c.x < -0.5 || c.y < -0.5 || c.z < -0.5
                        || c.x >= upper.x || c.y >= upper.y || c.z >= upper.z
                    {
                        continue;
                    }
                    let si = (c.x + 0.5).floor() as usize;
                    let sj = (c.y + 0.5).floor() as usize;
                    let sk = (c.z + 0.5).floor() as usize;
                    voxels.push((idx3d(i, j, k, tx, ty), values[idx3d(si, sj, sk, sx, sy)]));
                }
            }
        }

        debug_assert!(voxels.len() <= tx * ty * tz);
        ResampledImage {
            n_total: target.n_total(),
            fill_value,
            voxels,
        }
    }
}

/// Inclusive target index ranges that can contain the source footprint
///
/// The eight corners of the source box (pixel edges at -0.5 and n - 0.5) are
/// mapped into target index space. Returns `None` when the box misses the grid.
fn footprint_bounds(
    source: &Grid,
    target: &Grid,
) -> Option<((usize, usize), (usize, usize), (usize, usize))> {
    let (sx, sy, sz) = source.dims;
    let lo = DVec3::splat(-0.5);
    let hi = DVec3::new(sx as f64 - 0.5, sy as f64 - 0.5, sz as f64 - 0.5);

    let mut min = DVec3::splat(f64::INFINITY);
    let mut max = DVec3::splat(f64::NEG_INFINITY);
    for corner in 0..8 {
        let c = DVec3::new(
            if corner & 1 == 0 { lo.x } else { hi.x },
            if corner & 2 == 0 { lo.y } else { hi.y },
            if corner & 4 == 0 { lo.z } else { hi.z },
        );
        let t = target.world_to_index(source.index_to_world(c));
        min = min.min(t);
        max = max.max(t);
    }

    let (tx, ty, tz) = target.dims;
    let axis = |min: f64, max: f64, n: usize| -> Option<(usize, usize)> {
        // One voxel of slack absorbs rounding in the corner mapping
        let lo = (min.floor() - 1.0).max(0.0);
        let hi = (max.ceil() + 1.0).min(n as f64 - 1.0);
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            None
        } else {
            Some((lo as usize, hi as usize))
        }
    };

    Some((axis(min.x, max.x, tx)?, axis(min.y, max.y, ty)?, axis(min.z, max.z, tz)?))
}
