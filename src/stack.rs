//! Slices and stacks of slices
//!
//! A [`Slice`] is a single 2D image placed in world space by a rigid pose. The
//! pose maps slice-local millimetre coordinates, where pixel `(i, j)` sits at
//! `(i*vsx, j*vsy, 0)`, into world space; the third voxel size is the slice
//! thickness. A [`Stack`] owns an ordered list of slices acquired together.
//! Slices can be deleted from a stack (e.g. after outlier rejection); the
//! stack remembers which slice numbers it lost.

use glam::DVec3;
use tracing::info;

use crate::error::{Result, SdaError};
use crate::geometry::{Grid, RigidTransform};

/// Which per-slice signal is accumulated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceSource {
    /// Raw slice intensities
    Intensity,
    /// Intensities multiplied by the slice mask
    MaskedIntensity,
    /// The slice mask itself
    Mask,
}

impl SliceSource {
    /// Map the `use_masks` / `sda_mask` switches onto a source
    ///
    /// Mask reconstruction always accumulates masks, whatever `use_masks` says.
    pub fn from_flags(use_masks: bool, sda_mask: bool) -> Self {
        match (use_masks, sda_mask) {
            (false, false) => SliceSource::Intensity,
            (true, false) => SliceSource::MaskedIntensity,
            (_, true) => SliceSource::Mask,
        }
    }
}

/// 2D image slice with a rigid pose
#[derive(Clone, Debug)]
pub struct Slice {
    /// Pixel intensities (nx * ny), index = x + y*nx
    pub data: Vec<f64>,
    /// Optional binary mask (nx * ny)
    pub mask: Option<Vec<u8>>,
    /// In-plane dimensions (nx, ny)
    pub dims: (usize, usize),
    /// Pixel sizes and slice thickness in mm
    pub voxel_size: (f64, f64, f64),
    /// Slice-local to world transform
    pub pose: RigidTransform,
    slice_number: usize,
}

impl Slice {
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize),
        voxel_size: (f64, f64, f64),
        pose: RigidTransform,
        slice_number: usize,
    ) -> Result<Self> {
        SdaError::check_len("slice data", dims.0 * dims.1, data.len())?;
        let slice = Self {
            data,
            mask: None,
            dims,
            voxel_size,
            pose,
            slice_number,
        };
        slice.grid().validate()?;
        Ok(slice)
    }

    /// Attach a binary mask of the same in-plane size
    pub fn with_mask(mut self, mask: Vec<u8>) -> Result<Self> {
        SdaError::check_len("slice mask", self.data.len(), mask.len())?;
        self.mask = Some(mask);
        Ok(self)
    }

    /// Position of this slice within its parent stack
    pub fn slice_number(&self) -> usize {
        self.slice_number
    }

    /// The slice as a single-plane grid in world space
    pub fn grid(&self) -> Grid {
        Grid {
            dims: (self.dims.0, self.dims.1, 1),
            voxel_size: self.voxel_size,
            origin: self.pose.translation,
            direction: self.pose.rotation,
        }
    }

    /// Apply an additional rigid motion on top of the current pose
    pub fn apply_motion(&mut self, motion: &RigidTransform) {
        self.pose = motion.compose(&self.pose);
    }

    /// Mask value at pixel `i`; slices without mask are fully inside
    #[inline]
    fn mask_at(&self, i: usize) -> f64 {
        match &self.mask {
            Some(m) => {
                if m[i] > 0 {
                    1.0
                } else {
                    0.0
                }
            }
            None => 1.0,
        }
    }

    /// Per-pixel values fed into the accumulator for the given source
    pub fn source_values(&self, source: SliceSource) -> Vec<f64> {
        match source {
            SliceSource::Intensity => self.data.clone(),
            SliceSource::MaskedIntensity => self
                .data
                .iter()
                .enumerate()
                .map(|(i, &v)| v * self.mask_at(i))
                .collect(),
            SliceSource::Mask => (0..self.data.len()).map(|i| self.mask_at(i)).collect(),
        }
    }
}

/// Ordered collection of slices sharing an acquisition
#[derive(Clone, Debug)]
pub struct Stack {
    name: String,
    slices: Vec<Slice>,
    deleted_slice_numbers: Vec<usize>,
}

impl Stack {
    pub fn new(name: impl Into<String>, slices: Vec<Slice>) -> Self {
        Self {
            name: name.into(),
            slices,
            deleted_slice_numbers: Vec::new(),
        }
    }

    /// Split a 3D stack volume into its z-slices
    ///
    /// Slice `k` keeps the in-plane geometry of the stack and is placed at the
    /// world position of voxel `(0, 0, k)`. The stack's z voxel size becomes the
    /// slice thickness.
    ///
    /// # Arguments
    /// * `name` - Stack name used in log messages and filenames
    /// * `data` - Stack intensities (nx * ny * nz)
    /// * `mask` - Optional stack mask (nx * ny * nz)
    /// * `grid` - Stack geometry
    pub fn from_volume(
        name: impl Into<String>,
        data: &[f64],
        mask: Option<&[u8]>,
        grid: &Grid,
    ) -> Result<Self> {
        grid.validate()?;
        let (nx, ny, nz) = grid.dims;
        let n_plane = nx * ny;
        SdaError::check_len("stack data", grid.n_total(), data.len())?;
        if let Some(m) = mask {
            SdaError::check_len("stack mask", grid.n_total(), m.len())?;
        }

        let mut slices = Vec::with_capacity(nz);
        for k in 0..nz {
            let range = k * n_plane..(k + 1) * n_plane;
            let pose = RigidTransform::new(
                grid.direction,
                grid.index_to_world(DVec3::new(0.0, 0.0, k as f64)),
            );
            let mut slice = Slice::new(data[range.clone()].to_vec(), (nx, ny), grid.voxel_size, pose, k)?;
            if let Some(m) = mask {
                slice = slice.with_mask(m[range].to_vec())?;
            }
            slices.push(slice);
        }

        Ok(Self::new(name, slices))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live slices in acquisition order
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn slices_mut(&mut self) -> &mut [Slice] {
        &mut self.slices
    }

    /// Number of live slices
    pub fn number_of_slices(&self) -> usize {
        self.slices.len()
    }

    /// Slice numbers removed so far, in deletion order
    pub fn deleted_slice_numbers(&self) -> &[usize] {
        &self.deleted_slice_numbers
    }

    /// Remove the live slice with the given slice number
    ///
    /// Returns the removed slice, or `None` if no live slice has that number.
    pub fn delete_slice(&mut self, slice_number: usize) -> Option<Slice> {
        let pos = self
            .slices
            .iter()
            .position(|s| s.slice_number() == slice_number)?;
        self.deleted_slice_numbers.push(slice_number);
        Some(self.slices.remove(pos))
    }

    /// A stack without live slices contributes nothing
    pub fn is_dead(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Remove stacks whose slices were all deleted
///
/// Returns the removed stacks in their original order.
pub fn remove_dead_stacks(stacks: &mut Vec<Stack>) -> Vec<Stack> {
    let (dead, alive): (Vec<Stack>, Vec<Stack>) = stacks.drain(..).partition(Stack::is_dead);
    *stacks = alive;
    for stack in &dead {
        info!(
            "Stack '{}' removed entirely (deleted slices: {})",
            stack.name(),
            hyphenated_ranges(stack.deleted_slice_numbers())
        );
    }
    dead
}

/// Render numbers as sorted, hyphenated ranges, e.g. `[1, 2, 3, 7]` -> `"1-3, 7"`
pub fn hyphenated_ranges(numbers: &[usize]) -> String {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(", ")
}
