//! File-based reconstruction: stacks and target read from NIfTI, result written back

mod common;

use common::*;
use glam::{DMat3, DVec3};
use sda_core::nifti_io::{
    read_nifti_file, read_stack, read_volume, save_mask_to_file, save_nifti_to_file, save_volume, NiftiDatatype,
};
use sda_core::{ScatteredDataApproximation, SdaParams, Stack};

const N: usize = 8;

struct TempFiles(Vec<std::path::PathBuf>);

impl Drop for TempFiles {
    fn drop(&mut self) {
        for p in &self.0 {
            let _ = std::fs::remove_file(p);
        }
    }
}

#[test]
fn test_reconstruct_from_files() {
    init_tracing();
    let f = phantom(N);
    let files = TempFiles(vec![
        temp_path("axial.nii.gz"),
        temp_path("axial_mask.nii.gz"),
        temp_path("coronal.nii"),
        temp_path("target.nii.gz"),
        temp_path("recon.nii.gz"),
        temp_path("recon_mask.nii.gz"),
    ]);
    let [axial, axial_mask, coronal, target, recon, recon_mask] = [0, 1, 2, 3, 4, 5].map(|i| files.0[i].clone());

    let axial_grid = stack_grid(Orientation::Axial, N, 1);
    let coronal_grid = stack_grid(Orientation::Coronal, N, 1);
    save_nifti_to_file(&axial, &sample_values(&axial_grid, &f), &axial_grid, NiftiDatatype::Float32).unwrap();
    save_mask_to_file(&axial_mask, &vec![1u8; N * N * N], &axial_grid).unwrap();
    save_nifti_to_file(&coronal, &sample_values(&coronal_grid, &f), &coronal_grid, NiftiDatatype::Float32)
        .unwrap();
    let target_grid = target_volume(N, 1.0).grid;
    save_nifti_to_file(&target, &vec![0.0; N * N * N], &target_grid, NiftiDatatype::Float32).unwrap();

    let stacks = vec![
        read_stack(&axial, Some(&axial_mask)).unwrap(),
        read_stack(&coronal, None).unwrap(),
    ];
    assert_eq!(stacks[0].name(), format!("sda_core_it_{}_axial", std::process::id()));
    assert_eq!(stacks[0].number_of_slices(), N);
    assert!(stacks[0].slices()[0].mask.is_some());

    let volume = read_volume(&target, None).unwrap();
    assert!(volume.grid.same_geometry(&target_grid, 1e-5));

    let params = SdaParams::default().with_sigma(0.0).with_use_masks(true);
    let mut sda = ScatteredDataApproximation::new(stacks, volume, params).unwrap();
    sda.run().unwrap();
    save_volume(sda.reconstruction(), &recon, Some(&recon_mask)).unwrap();

    let back = read_nifti_file(&recon).unwrap();
    assert_eq!(back.dims, (N, N, N));
    let truth = ground_truth(sda.reconstruction(), &f);
    // Float32 storage on both ends
    assert!(max_abs_diff(&back.data, &truth) < 1e-4);

    let mask_back = read_volume(&recon, Some(&recon_mask)).unwrap();
    assert_eq!(mask_back.mask_count(), N * N * N);
}

#[test]
fn test_mismatched_mask_rejected() {
    let files = TempFiles(vec![temp_path("stack_bad.nii"), temp_path("stack_bad_mask.nii")]);
    let grid = stack_grid(Orientation::Axial, N, 1);
    save_nifti_to_file(&files.0[0], &vec![1.0; N * N * N], &grid, NiftiDatatype::Float32).unwrap();
    let small = target_volume(4, 1.0).grid;
    save_mask_to_file(&files.0[1], &vec![1u8; 64], &small).unwrap();

    assert!(read_stack(&files.0[0], Some(&files.0[1])).is_err());
}

#[test]
fn test_missing_file_reports_path() {
    let path = temp_path("does_not_exist.nii.gz");
    let err = read_stack(&path, None).unwrap_err();
    assert!(err.to_string().contains("does_not_exist"));
}

#[test]
fn test_rotated_stack_round_trip() {
    let files = TempFiles(vec![temp_path("rotated.nii.gz")]);
    let grid = stack_grid(Orientation::Sagittal, N, 2);
    let grid = grid.clone().with_direction(DMat3::from_rotation_z(0.3) * grid.direction);
    let data = sample_values(&grid, &|p: DVec3| p.x + 2.0 * p.y);
    save_nifti_to_file(&files.0[0], &data, &grid, NiftiDatatype::Float32).unwrap();

    let stack: Stack = read_stack(&files.0[0], None).unwrap();
    assert_eq!(stack.number_of_slices(), N / 2);
    let slice = &stack.slices()[1];
    assert!((slice.voxel_size.2 - 2.0).abs() < 1e-5);
    let expected = grid.index_to_world(DVec3::new(0.0, 0.0, 1.0));
    assert!((slice.pose.translation - expected).length() < 1e-4);
}
