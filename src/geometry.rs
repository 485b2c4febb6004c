//! Image geometry: reconstruction grids and rigid slice poses
//!
//! A [`Grid`] places a voxel lattice in world space (mm). Voxel `(i, j, k)` has
//! its centre at `origin + direction * (i*vsx, j*vsy, k*vsz)`, so the columns of
//! `direction` are the unit vectors of the three image axes. This is the same
//! information a NIfTI sform affine carries, and [`Grid::from_affine`] /
//! [`Grid::to_affine`] convert between the two.
//!
//! A [`RigidTransform`] is a rotation followed by a translation. Slices use it
//! as their pose, mapping slice-local millimetre coordinates into world space.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdaError};

/// Index into 3D array (Fortran/column-major order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Geometry of a regular 3D voxel grid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// World position of the centre of voxel (0, 0, 0)
    pub origin: DVec3,
    /// Axis directions as matrix columns (orthonormal for scanner data)
    pub direction: DMat3,
}

impl Grid {
    /// Axis-aligned grid with identity direction
    pub fn new(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), origin: DVec3) -> Self {
        Self {
            dims,
            voxel_size,
            origin,
            direction: DMat3::IDENTITY,
        }
    }

    /// Same grid with a different direction matrix
    pub fn with_direction(mut self, direction: DMat3) -> Self {
        self.direction = direction;
        self
    }

    /// Build a grid from a row-major 4x4 affine (NIfTI sform convention)
    ///
    /// Voxel sizes are the column norms of the upper-left 3x3 block; the
    /// direction matrix is that block with its columns normalised.
    pub fn from_affine(dims: (usize, usize, usize), affine: &[f64; 16]) -> Result<Self> {
        let columns = [
            DVec3::new(affine[0], affine[4], affine[8]),
            DVec3::new(affine[1], affine[5], affine[9]),
            DVec3::new(affine[2], affine[6], affine[10]),
        ];
        let spacing = [columns[0].length(), columns[1].length(), columns[2].length()];

        for (axis, &s) in spacing.iter().enumerate() {
            if !(s.is_finite() && s > 0.0) {
                return Err(SdaError::InvalidGeometry(format!(
                    "affine column {} has zero or non-finite length",
                    axis
                )));
            }
        }

        let grid = Self {
            dims,
            voxel_size: (spacing[0], spacing[1], spacing[2]),
            origin: DVec3::new(affine[3], affine[7], affine[11]),
            direction: DMat3::from_cols(
                columns[0] / spacing[0],
                columns[1] / spacing[1],
                columns[2] / spacing[2],
            ),
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Row-major 4x4 affine mapping voxel indices to world coordinates
    pub fn to_affine(&self) -> [f64; 16] {
        let m = self.index_to_world_matrix();
        let o = self.origin;
        [
            m.x_axis.x, m.y_axis.x, m.z_axis.x, o.x,
            m.x_axis.y, m.y_axis.y, m.z_axis.y, o.y,
            m.x_axis.z, m.y_axis.z, m.z_axis.z, o.z,
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    /// Reject grids that cannot map between index and world space
    pub fn validate(&self) -> Result<()> {
        let (nx, ny, nz) = self.dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(SdaError::InvalidGeometry(format!(
                "empty grid {}x{}x{}",
                nx, ny, nz
            )));
        }
        let (vsx, vsy, vsz) = self.voxel_size;
        if [vsx, vsy, vsz].iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(SdaError::InvalidGeometry(format!(
                "voxel size ({}, {}, {}) must be positive",
                vsx, vsy, vsz
            )));
        }
        let det = self.direction.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return Err(SdaError::InvalidGeometry(
                "direction matrix is singular".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of voxels
    pub fn n_total(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Voxel sizes as an array
    pub fn spacing(&self) -> [f64; 3] {
        [self.voxel_size.0, self.voxel_size.1, self.voxel_size.2]
    }

    /// Linear part of the index-to-world mapping (direction * diag(spacing))
    pub fn index_to_world_matrix(&self) -> DMat3 {
        let (vsx, vsy, vsz) = self.voxel_size;
        DMat3::from_cols(
            self.direction.x_axis * vsx,
            self.direction.y_axis * vsy,
            self.direction.z_axis * vsz,
        )
    }

    /// World position of a (possibly fractional) voxel index
    pub fn index_to_world(&self, index: DVec3) -> DVec3 {
        self.origin + self.index_to_world_matrix() * index
    }

    /// Continuous voxel index of a world position
    pub fn world_to_index(&self, point: DVec3) -> DVec3 {
        self.index_to_world_matrix().inverse() * (point - self.origin)
    }

    /// True when both grids describe the same lattice within `tol`
    pub fn same_geometry(&self, other: &Grid, tol: f64) -> bool {
        let close = |a: DVec3, b: DVec3| (a - b).abs().max_element() <= tol;
        self.dims == other.dims
            && (self.voxel_size.0 - other.voxel_size.0).abs() <= tol
            && (self.voxel_size.1 - other.voxel_size.1).abs() <= tol
            && (self.voxel_size.2 - other.voxel_size.2).abs() <= tol
            && close(self.origin, other.origin)
            && close(self.direction.x_axis, other.direction.x_axis)
            && close(self.direction.y_axis, other.direction.y_axis)
            && close(self.direction.z_axis, other.direction.z_axis)
    }
}

/// Rigid transformation p' = R p + t
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// Rotation matrix
    pub rotation: DMat3,
    /// Translation in mm
    pub translation: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: DMat3::IDENTITY,
            translation: DVec3::ZERO,
        }
    }

    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self { rotation, translation }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            rotation: DMat3::IDENTITY,
            translation,
        }
    }

    /// Euler angles in radians, applied in the order X, then Y, then Z
    pub fn from_euler(angle_x: f64, angle_y: f64, angle_z: f64, translation: DVec3) -> Self {
        let rotation =
            DMat3::from_rotation_z(angle_z) * DMat3::from_rotation_y(angle_y) * DMat3::from_rotation_x(angle_x);
        Self { rotation, translation }
    }

    /// Map a point
    #[inline]
    pub fn apply(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Transform applying `inner` first and then `self`
    pub fn compose(&self, inner: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation * inner.rotation,
            translation: self.rotation * inner.translation + self.translation,
        }
    }

    /// Inverse transform; the rotation is inverted in general form so
    /// slightly non-orthogonal matrices from file headers stay consistent.
    pub fn inverse(&self) -> RigidTransform {
        let inv = self.rotation.inverse();
        RigidTransform {
            rotation: inv,
            translation: -(inv * self.translation),
        }
    }
}
