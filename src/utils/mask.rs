//! Binary mask utilities
//!
//! Structuring elements and binary dilation on flat 3D masks, plus the voxel-wise
//! union and intersection used to build joint masks from several stacks. All
//! masks use Fortran ordering: index = x + y*nx + z*nx*ny.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SdaError;

/// Shape of the neighbourhood used for dilation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuringElement {
    /// Voxels within Euclidean distance `radius + 0.5` of the centre
    #[default]
    Ball,
    /// Full cube of side `2 * radius + 1`
    Box,
    /// Centre plus the six axis arms of length `radius`
    Cross,
    /// One-voxel thick spherical shell at distance `radius`, centre excluded
    Annulus,
}

impl StructuringElement {
    /// Neighbourhood offsets (dx, dy, dz) for the given radius in voxels
    pub fn offsets(self, radius: usize) -> Vec<(isize, isize, isize)> {
        let r = radius as isize;
        let outer = (radius as f64 + 0.5).powi(2);
        let inner = (radius as f64 - 0.5).max(0.0).powi(2);

        let mut offsets = Vec::new();
        for dz in -r..=r {
            for dy in -r..=r {
                for dx in -r..=r {
                    let d2 = (dx * dx + dy * dy + dz * dz) as f64;
                    let keep = match self {
                        StructuringElement::Ball => d2 <= outer,
                        StructuringElement::Box => true,
                        StructuringElement::Cross => {
                            [dx, dy, dz].iter().filter(|&&d| d != 0).count() <= 1
                        }
                        StructuringElement::Annulus => d2 > inner && d2 <= outer,
                    };
                    if keep {
                        offsets.push((dx, dy, dz));
                    }
                }
            }
        }
        offsets
    }
}

impl fmt::Display for StructuringElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructuringElement::Ball => "Ball",
            StructuringElement::Box => "Box",
            StructuringElement::Cross => "Cross",
            StructuringElement::Annulus => "Annulus",
        };
        f.write_str(name)
    }
}

impl FromStr for StructuringElement {
    type Err = SdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ball" => Ok(StructuringElement::Ball),
            "box" => Ok(StructuringElement::Box),
            "cross" => Ok(StructuringElement::Cross),
            "annulus" => Ok(StructuringElement::Annulus),
            _ => Err(SdaError::UnknownKernel(s.to_string())),
        }
    }
}

/// Binary dilation of a mask
///
/// A voxel is set in the output when any voxel of the structuring element
/// centred on it is set in the input. Radius 0 returns the binarized input.
///
/// # Arguments
/// * `mask` - Input mask (nx * ny * nz); any non-zero value is foreground
/// * `nx`, `ny`, `nz` - Volume dimensions
/// * `element` - Structuring element shape
/// * `radius` - Element radius in voxels
///
/// # Returns
/// Dilated binary mask (0 or 1)
pub fn binary_dilate(
    mask: &[u8],
    nx: usize, ny: usize, nz: usize,
    element: StructuringElement,
    radius: usize,
) -> Vec<u8> {
    let mut out: Vec<u8> = mask.iter().map(|&m| u8::from(m > 0)).collect();
    if radius == 0 || out.is_empty() {
        return out;
    }

    let offsets = element.offsets(radius);
    let plane_size = nx * ny;
    let (nxi, nyi, nzi) = (nx as isize, ny as isize, nz as isize);

    out.par_chunks_mut(plane_size).enumerate().for_each(|(k, plane)| {
        let k = k as isize;
        for j in 0..nyi {
            for i in 0..nxi {
                let hit = offsets.iter().any(|&(dx, dy, dz)| {
                    let (x, y, z) = (i - dx, j - dy, k - dz);
                    x >= 0 && y >= 0 && z >= 0 && x < nxi && y < nyi && z < nzi
                        && mask[(x + y * nxi + z * nxi * nyi) as usize] > 0
                });
                plane[(i + j * nxi) as usize] = u8::from(hit);
            }
        }
    });

    out
}

/// Set `acc` to the voxel-wise union of `acc` and `other`
pub fn union_into(acc: &mut [u8], other: &[u8]) {
    for (a, &b) in acc.iter_mut().zip(other) {
        *a = u8::from(*a > 0 || b > 0);
    }
}

/// Set `acc` to the voxel-wise intersection of `acc` and `other`
pub fn intersect_into(acc: &mut [u8], other: &[u8]) {
    for (a, &b) in acc.iter_mut().zip(other) {
        *a = u8::from(*a > 0 && b > 0);
    }
}
