//! Common test utilities for SDA-core integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use glam::{DMat3, DVec3};
use sda_core::{Grid, Stack, Volume};

/// Compute RMSE between two arrays, only within mask (non-zero values)
pub fn rmse(a: &[f64], b: &[f64], mask: &[u8]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] > 0 {
            let diff = a[i] - b[i];
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Largest absolute difference between two arrays
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Unique path in the system temp directory
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sda_core_it_{}_{}", std::process::id(), name))
}

/// Cubic target volume of `n` voxels per side with isotropic spacing
pub fn target_volume(n: usize, spacing: f64) -> Volume {
    Volume::new(Grid::new((n, n, n), (spacing, spacing, spacing), DVec3::ZERO)).unwrap()
}

/// Smooth blob centred in an `n`-voxel cube of unit spacing
pub fn phantom(n: usize) -> impl Fn(DVec3) -> f64 {
    let c = DVec3::splat((n as f64 - 1.0) / 2.0);
    let width = n as f64 / 4.0;
    move |p: DVec3| 10.0 + 50.0 * (-(p - c).length_squared() / (2.0 * width * width)).exp()
}

/// Slice plane orientation of a synthetic stack
#[derive(Clone, Copy, Debug)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Stack grid covering the same cube as [`target_volume`]
///
/// `thickness` is the slice spacing and thickness along the through-plane axis.
pub fn stack_grid(orientation: Orientation, n: usize, thickness: usize) -> Grid {
    let (x, y, z) = (DVec3::X, DVec3::Y, DVec3::Z);
    let direction = match orientation {
        Orientation::Axial => DMat3::from_cols(x, y, z),
        Orientation::Coronal => DMat3::from_cols(x, z, y),
        Orientation::Sagittal => DMat3::from_cols(y, z, x),
    };
    let n_slices = n / thickness;
    // First slice centred on the middle of its `thickness` target planes
    let offset = (thickness as f64 - 1.0) / 2.0;
    Grid::new((n, n, n_slices), (1.0, 1.0, thickness as f64), direction.z_axis * offset)
        .with_direction(direction)
}

/// Evaluate `f` at every voxel centre of `grid`
pub fn sample_values(grid: &Grid, f: &dyn Fn(DVec3) -> f64) -> Vec<f64> {
    let (nx, ny, nz) = grid.dims;
    let mut data = Vec::with_capacity(grid.n_total());
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                data.push(f(grid.index_to_world(DVec3::new(i as f64, j as f64, k as f64))));
            }
        }
    }
    data
}

/// Sample `f` on `grid` and split the result into a stack
pub fn sample_stack(name: &str, grid: &Grid, f: &dyn Fn(DVec3) -> f64, mask: Option<&[u8]>) -> Stack {
    Stack::from_volume(name, &sample_values(grid, f), mask, grid).unwrap()
}

/// Three orthogonal stacks of unit-thickness slices sampling `f`
pub fn orthogonal_stacks(n: usize, f: &dyn Fn(DVec3) -> f64) -> Vec<Stack> {
    [
        ("axial", Orientation::Axial),
        ("coronal", Orientation::Coronal),
        ("sagittal", Orientation::Sagittal),
    ]
    .iter()
    .map(|&(name, o)| sample_stack(name, &stack_grid(o, n, 1), f, None))
    .collect()
}

/// Evaluate `f` at every voxel centre of the target grid
pub fn ground_truth(volume: &Volume, f: &dyn Fn(DVec3) -> f64) -> Vec<f64> {
    sample_values(&volume.grid, f)
}

/// Binary mask of the points where `inside` holds
pub fn sample_mask(grid: &Grid, inside: &dyn Fn(DVec3) -> bool) -> Vec<u8> {
    sample_values(grid, &|p| f64::from(u8::from(inside(p))))
        .iter()
        .map(|&v| v as u8)
        .collect()
}

/// Mask excluding a `margin`-voxel border
pub fn interior_mask(n: usize, margin: usize) -> Vec<u8> {
    let mut mask = vec![0u8; n * n * n];
    for k in margin..n - margin {
        for j in margin..n - margin {
            for i in margin..n - margin {
                mask[i + j * n + k * n * n] = 1;
            }
        }
    }
    mask
}
