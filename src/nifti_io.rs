//! NIfTI-1 file I/O
//!
//! Loads `.nii` and `.nii.gz` volumes (gzip is auto-detected) into flat
//! Fortran-ordered arrays with their grid geometry, and writes float volumes
//! and binary masks back with the grid's affine in the sform.

use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use tracing::debug;

use crate::error::{Result, SdaError};
use crate::geometry::Grid;
use crate::stack::Stack;
use crate::volume::Volume;

/// NIfTI data loaded from bytes
pub struct NiftiData {
    /// Volume data as f64 (scaling already applied)
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz); extra dimensions are dropped
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm (pixdim)
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
    /// Data scaling slope
    pub scl_slope: f64,
    /// Data scaling intercept
    pub scl_inter: f64,
}

impl NiftiData {
    /// Grid geometry described by the affine
    pub fn grid(&self) -> Result<Grid> {
        Grid::from_affine(self.dims, &self.affine)
    }

    /// Data binarized as a mask (any positive value is foreground)
    pub fn to_mask(&self) -> Vec<u8> {
        self.data.iter().map(|&v| u8::from(v > 0.0)).collect()
    }
}

/// On-disk sample type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NiftiDatatype {
    /// 8-bit unsigned integer, used for masks
    Uint8,
    /// 32-bit float, used for intensities
    Float32,
}

impl NiftiDatatype {
    fn code(self) -> i16 {
        match self {
            NiftiDatatype::Uint8 => 2,
            NiftiDatatype::Float32 => 16,
        }
    }

    fn bitpix(self) -> i16 {
        match self {
            NiftiDatatype::Uint8 => 8,
            NiftiDatatype::Float32 => 32,
        }
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Header summary appended to parse errors
fn header_summary(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }
    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Load a NIfTI volume from bytes
///
/// 4D files yield their first volume.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData> {
    let raw = if is_gzip(bytes) {
        let mut decompressed = Vec::new();
        std::io::Read::read_to_end(&mut GzDecoder::new(Cursor::new(bytes)), &mut decompressed)
            .map_err(|e| SdaError::Nifti(format!("failed to decompress: {}", e)))?;
        decompressed
    } else {
        bytes.to_vec()
    };

    let obj = InMemNiftiObject::from_reader(Cursor::new(&raw))
        .map_err(|e| SdaError::Nifti(format!("{} ({})", e, header_summary(&raw))))?;

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(SdaError::Nifti(format!("expected at least 3D volume, got {}D", ndim)));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = header_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| SdaError::Nifti(format!("failed to convert volume: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(SdaError::Nifti(format!("expected at least 3D array, got {}D", shape.len())));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    // Fortran order, index = x + y*nx + z*nx*ny
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    let mut index = vec![0usize; shape.len()];
                    index[0] = i;
                    index[1] = j;
                    index[2] = k;
                    array[index.as_slice()]
                };
                data.push(v);
            }
        }
    }

    debug!(nx, ny, nz, vsx = voxel_size.0, vsy = voxel_size.1, vsz = voxel_size.2, "Loaded NIfTI");
    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
        scl_slope,
        scl_inter,
    })
}

/// Affine from the sform, or a pixdim scaling when no sform is set
fn header_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let (x, y, z) = (&header.srow_x, &header.srow_y, &header.srow_z);
        [
            x[0] as f64, x[1] as f64, x[2] as f64, x[3] as f64,
            y[0] as f64, y[1] as f64, y[2] as f64, y[3] as f64,
            z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let p = &header.pixdim;
        [
            p[1] as f64, 0.0, 0.0, 0.0,
            0.0, p[2] as f64, 0.0, 0.0,
            0.0, 0.0, p[3] as f64, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Encode a volume as uncompressed NIfTI-1 bytes
///
/// # Arguments
/// * `data` - Samples (grid.n_total()), Fortran order
/// * `grid` - Geometry written to pixdim and sform
/// * `datatype` - Sample type on disk; `Uint8` rounds and saturates
pub fn save_nifti(data: &[f64], grid: &Grid, datatype: NiftiDatatype) -> Result<Vec<u8>> {
    SdaError::check_len("NIfTI data", grid.n_total(), data.len())?;
    let (nx, ny, nz) = grid.dims;
    let too_large = |n: usize| i16::try_from(n).is_err();
    if too_large(nx) || too_large(ny) || too_large(nz) {
        return Err(SdaError::Nifti(format!(
            "dimensions {}x{}x{} exceed the NIfTI-1 limit",
            nx, ny, nz
        )));
    }
    let (vsx, vsy, vsz) = grid.voxel_size;
    let affine = grid.to_affine();

    let mut header = [0u8; 348];
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        header[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }
    header[70..72].copy_from_slice(&datatype.code().to_le_bytes());
    header[72..74].copy_from_slice(&datatype.bitpix().to_le_bytes());

    // qfac = 1
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        header[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset: header plus the 4-byte empty extension block
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // xyzt_units: mm
    header[123] = 2;

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for (row, offset) in [280usize, 296, 312].into_iter().enumerate() {
        for c in 0..4 {
            let at = offset + c * 4;
            header[at..at + 4].copy_from_slice(&(affine[row * 4 + c] as f32).to_le_bytes());
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let bytes_per_sample = datatype.bitpix() as usize / 8;
    let mut buffer = Vec::with_capacity(352 + data.len() * bytes_per_sample);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    match datatype {
        NiftiDatatype::Float32 => {
            for &v in data {
                buffer.extend_from_slice(&(v as f32).to_le_bytes());
            }
        }
        NiftiDatatype::Uint8 => {
            buffer.extend(data.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8));
        }
    }

    Ok(buffer)
}

/// Encode a volume as gzipped NIfTI-1 bytes (.nii.gz)
pub fn save_nifti_gz(data: &[f64], grid: &Grid, datatype: NiftiDatatype) -> Result<Vec<u8>> {
    let uncompressed = save_nifti(data, grid, datatype)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| SdaError::Nifti(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SdaError::Nifti(format!("gzip finish failed: {}", e)))
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    let bytes = std::fs::read(path).map_err(|source| SdaError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    load_nifti(&bytes)
}

/// Write a volume to `path`; `.nii.gz` paths are gzip compressed
pub fn save_nifti_to_file(path: &Path, data: &[f64], grid: &Grid, datatype: NiftiDatatype) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(data, grid, datatype)?
    } else {
        save_nifti(data, grid, datatype)?
    };
    std::fs::write(path, &bytes).map_err(|source| SdaError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a binary mask as a uint8 volume
pub fn save_mask_to_file(path: &Path, mask: &[u8], grid: &Grid) -> Result<()> {
    let data: Vec<f64> = mask.iter().map(|&m| f64::from(m)).collect();
    save_nifti_to_file(path, &data, grid, NiftiDatatype::Uint8)
}

/// Read a target volume and, optionally, its mask
///
/// The mask must share the volume's dimensions; without one the mask covers
/// the whole grid.
pub fn read_volume(path: &Path, mask_path: Option<&Path>) -> Result<Volume> {
    let image = read_nifti_file(path)?;
    let grid = image.grid()?;
    let mask = match mask_path {
        Some(p) => Some(read_mask(p, &grid)?),
        None => None,
    };
    Volume::from_data(grid, image.data, mask)
}

/// Write the intensity field and, optionally, the mask of a volume
pub fn save_volume(volume: &Volume, path: &Path, mask_path: Option<&Path>) -> Result<()> {
    save_nifti_to_file(path, &volume.data, &volume.grid, NiftiDatatype::Float32)?;
    if let Some(p) = mask_path {
        save_mask_to_file(p, &volume.mask, &volume.grid)?;
    }
    Ok(())
}

/// Read a stack volume and split it into slices
///
/// The stack name is the file name without its NIfTI extension.
pub fn read_stack(path: &Path, mask_path: Option<&Path>) -> Result<Stack> {
    let image = read_nifti_file(path)?;
    let grid = image.grid()?;
    let mask = match mask_path {
        Some(p) => Some(read_mask(p, &grid)?),
        None => None,
    };
    Stack::from_volume(stack_name(path), &image.data, mask.as_deref(), &grid)
}

fn read_mask(path: &Path, grid: &Grid) -> Result<Vec<u8>> {
    let image = read_nifti_file(path)?;
    if image.dims != grid.dims {
        return Err(SdaError::InvalidGeometry(format!(
            "mask '{}' has dimensions {:?}, expected {:?}",
            path.display(),
            image.dims,
            grid.dims
        )));
    }
    Ok(image.to_mask())
}

fn stack_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    file.trim_end_matches(".gz").trim_end_matches(".nii").to_string()
}
