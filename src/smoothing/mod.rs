//! Separable recursive Gaussian smoothing
//!
//! Both filters approximate a Gaussian with a small IIR recursion run forward
//! and backward along every line of the volume, so the cost per sample does
//! not depend on sigma. Sigma is given in mm per axis and converted to voxels
//! with the grid spacing. An axis with sigma 0 (or a single voxel) is left
//! untouched, which makes sigma 0 on every axis the identity.
//!
//! Lines along x are contiguous and filtered in place. Lines along y are
//! gathered per z-plane, and lines along z are gathered across planes.

pub mod deriche;
pub mod yvv;

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SdaError;
use crate::geometry::Grid;

pub use deriche::DericheGaussian;
pub use yvv::YvvGaussian;

/// Recursive Gaussian filter applied to a whole volume
pub trait RecursiveGaussian: Send + Sync {
    /// Short filter name for log messages
    fn name(&self) -> &'static str;

    /// Smooth a volume
    ///
    /// # Arguments
    /// * `data` - Volume (grid.n_total()), Fortran order
    /// * `grid` - Geometry providing dimensions and spacing
    /// * `sigma` - Gaussian standard deviation per axis in mm
    ///
    /// # Returns
    /// Smoothed volume with the same shape
    fn smooth(&self, data: &[f64], grid: &Grid, sigma: [f64; 3]) -> Vec<f64>;
}

/// Smoothing variant used for the numerator and denominator volumes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SmoothingApproach {
    /// Young-van Vliet recursive Gaussian; keeps non-negative input non-negative
    #[default]
    Yvv,
    /// Deriche 4th-order recursive Gaussian; may undershoot near edges
    Deriche,
}

impl SmoothingApproach {
    /// Filter implementing this approach
    pub fn filter(self) -> Box<dyn RecursiveGaussian> {
        match self {
            SmoothingApproach::Yvv => Box::new(YvvGaussian),
            SmoothingApproach::Deriche => Box::new(DericheGaussian),
        }
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            SmoothingApproach::Yvv => "Shepard-YVV",
            SmoothingApproach::Deriche => "Shepard-Deriche",
        }
    }
}

impl fmt::Display for SmoothingApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmoothingApproach {
    type Err = SdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yvv" | "shepard-yvv" => Ok(SmoothingApproach::Yvv),
            "deriche" | "shepard-deriche" => Ok(SmoothingApproach::Deriche),
            _ => Err(SdaError::UnknownApproach(s.to_string())),
        }
    }
}

impl TryFrom<String> for SmoothingApproach {
    type Error = SdaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SmoothingApproach> for String {
    fn from(approach: SmoothingApproach) -> Self {
        approach.as_str().to_string()
    }
}

/// 1D recursive filter for a fixed sigma (in voxels)
pub(crate) trait LineFilter: Sync {
    /// Filter `line` in place; `scratch` is reusable working memory
    fn apply(&self, line: &mut [f64], scratch: &mut Vec<f64>);
}

/// Run a line filter along every axis with positive sigma
///
/// `make_filter` receives sigma in voxel units for the axis being processed.
pub(crate) fn smooth_separable<L, M>(data: &[f64], grid: &Grid, sigma: [f64; 3], make_filter: M) -> Vec<f64>
where
    L: LineFilter,
    M: Fn(f64) -> L,
{
    let (nx, ny, nz) = grid.dims;
    let dims = [nx, ny, nz];
    let spacing = grid.spacing();
    let mut out = data.to_vec();

    for axis in 0..3 {
        if !(sigma[axis] > 0.0) || dims[axis] < 2 {
            continue;
        }
        let filter = make_filter(sigma[axis] / spacing[axis]);
        match axis {
            0 => filter_x(&mut out, nx, &filter),
            1 => filter_y(&mut out, nx, ny, &filter),
            _ => filter_z(&mut out, nx, ny, nz, &filter),
        }
    }

    out
}

fn filter_x<L: LineFilter>(data: &mut [f64], nx: usize, filter: &L) {
    data.par_chunks_mut(nx)
        .for_each_init(Vec::new, |scratch, line| filter.apply(line, scratch));
}

fn filter_y<L: LineFilter>(data: &mut [f64], nx: usize, ny: usize, filter: &L) {
    data.par_chunks_mut(nx * ny).for_each_init(
        || (vec![0.0; ny], Vec::new()),
        |(line, scratch), plane| {
            for i in 0..nx {
                for j in 0..ny {
                    line[j] = plane[i + j * nx];
                }
                filter.apply(line, scratch);
                for j in 0..ny {
                    plane[i + j * nx] = line[j];
                }
            }
        },
    );
}

fn filter_z<L: LineFilter>(data: &mut [f64], nx: usize, ny: usize, nz: usize, filter: &L) {
    let plane_size = nx * ny;
    let src: &[f64] = data;
    let lines: Vec<Vec<f64>> = (0..plane_size)
        .into_par_iter()
        .map_init(Vec::new, |scratch, p| {
            let mut line: Vec<f64> = (0..nz).map(|k| src[p + k * plane_size]).collect();
            filter.apply(&mut line, scratch);
            line
        })
        .collect();

    for (p, line) in lines.iter().enumerate() {
        for (k, &v) in line.iter().enumerate() {
            data[p + k * plane_size] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::idx3d;
    use glam::DVec3;

    fn grid(dims: (usize, usize, usize)) -> Grid {
        Grid::new(dims, (1.0, 1.0, 1.0), DVec3::ZERO)
    }

    fn impulse(dims: (usize, usize, usize)) -> Vec<f64> {
        let mut v = vec![0.0; dims.0 * dims.1 * dims.2];
        v[idx3d(dims.0 / 2, dims.1 / 2, dims.2 / 2, dims.0, dims.1)] = 1.0;
        v
    }

    #[test]
    fn test_parse_approach() {
        assert_eq!("YVV".parse::<SmoothingApproach>().unwrap(), SmoothingApproach::Yvv);
        assert_eq!("shepard-yvv".parse::<SmoothingApproach>().unwrap(), SmoothingApproach::Yvv);
        assert_eq!("Shepard-Deriche".parse::<SmoothingApproach>().unwrap(), SmoothingApproach::Deriche);
        assert_eq!(" deriche ".parse::<SmoothingApproach>().unwrap(), SmoothingApproach::Deriche);
        assert!("Shepard-Box".parse::<SmoothingApproach>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for a in [SmoothingApproach::Yvv, SmoothingApproach::Deriche] {
            assert_eq!(a.to_string().parse::<SmoothingApproach>().unwrap(), a);
        }
        assert_eq!(SmoothingApproach::default(), SmoothingApproach::Yvv);
    }

    #[test]
    fn test_filter_names() {
        assert_eq!(SmoothingApproach::Yvv.filter().name(), "YVV");
        assert_eq!(SmoothingApproach::Deriche.filter().name(), "Deriche");
    }

    #[test]
    fn test_zero_sigma_identity() {
        let dims = (5, 6, 7);
        let data: Vec<f64> = (0..210).map(|i| ((i * 37) % 13) as f64).collect();
        for a in [SmoothingApproach::Yvv, SmoothingApproach::Deriche] {
            let out = a.filter().smooth(&data, &grid(dims), [0.0; 3]);
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_axis_selective() {
        // Sigma only along y must leave x and z profiles of an impulse untouched
        let dims = (9, 9, 9);
        let data = impulse(dims);
        for a in [SmoothingApproach::Yvv, SmoothingApproach::Deriche] {
            let out = a.filter().smooth(&data, &grid(dims), [0.0, 1.5, 0.0]);
            for k in 0..9 {
                for j in 0..9 {
                    for i in 0..9 {
                        let v = out[idx3d(i, j, k, 9, 9)];
                        if i != 4 || k != 4 {
                            assert!(v.abs() < 1e-12, "{} leaked to ({},{},{})", a, i, j, k);
                        }
                    }
                }
            }
            assert!(out[idx3d(4, 5, 4, 9, 9)] > 0.1);
        }
    }

    #[test]
    fn test_spacing_scales_sigma() {
        // 2 mm sigma on a 2 mm grid equals 1 mm sigma on a 1 mm grid
        let dims = (15, 1, 1);
        let data = impulse(dims);
        let fine = YvvGaussian.smooth(&data, &grid(dims), [1.0, 0.0, 0.0]);
        let coarse_grid = Grid::new(dims, (2.0, 1.0, 1.0), DVec3::ZERO);
        let coarse = YvvGaussian.smooth(&data, &coarse_grid, [2.0, 0.0, 0.0]);
        for (a, b) in fine.iter().zip(&coarse) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&SmoothingApproach::Deriche).unwrap();
        assert_eq!(json, "\"Shepard-Deriche\"");
        let parsed: SmoothingApproach = serde_json::from_str("\"yvv\"").unwrap();
        assert_eq!(parsed, SmoothingApproach::Yvv);
        assert!(serde_json::from_str::<SmoothingApproach>("\"gauss\"").is_err());
    }
}
