//! Target volume: the fixed reconstruction space with its intensity and mask fields

use crate::error::{Result, SdaError};
use crate::geometry::Grid;

/// 3D volume on a fixed grid with an intensity field and a binary mask
///
/// Both fields are flattened in Fortran order (index = x + y*nx + z*nx*ny).
#[derive(Clone, Debug)]
pub struct Volume {
    /// Grid geometry
    pub grid: Grid,
    /// Intensity field (nx * ny * nz)
    pub data: Vec<f64>,
    /// Binary mask (nx * ny * nz), 1 = region of interest
    pub mask: Vec<u8>,
}

impl Volume {
    /// Zero intensities with a mask covering the whole grid
    pub fn new(grid: Grid) -> Result<Self> {
        grid.validate()?;
        let n_total = grid.n_total();
        Ok(Self {
            grid,
            data: vec![0.0; n_total],
            mask: vec![1; n_total],
        })
    }

    /// Wrap existing intensity data; the mask covers the whole grid unless given
    pub fn from_data(grid: Grid, data: Vec<f64>, mask: Option<Vec<u8>>) -> Result<Self> {
        grid.validate()?;
        let n_total = grid.n_total();
        SdaError::check_len("volume data", n_total, data.len())?;
        let mask = match mask {
            Some(m) => {
                SdaError::check_len("volume mask", n_total, m.len())?;
                m
            }
            None => vec![1; n_total],
        };
        Ok(Self { grid, data, mask })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.grid.dims
    }

    pub fn n_total(&self) -> usize {
        self.grid.n_total()
    }

    /// Replace the intensity field
    pub fn set_data(&mut self, data: Vec<f64>) -> Result<()> {
        SdaError::check_len("volume data", self.n_total(), data.len())?;
        self.data = data;
        Ok(())
    }

    /// Replace the mask field
    pub fn set_mask(&mut self, mask: Vec<u8>) -> Result<()> {
        SdaError::check_len("volume mask", self.n_total(), mask.len())?;
        self.mask = mask;
        Ok(())
    }

    /// Number of voxels inside the mask
    pub fn mask_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m > 0).count()
    }
}
