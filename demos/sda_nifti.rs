//! SDA reconstruction of NIfTI stacks
//!
//! Usage:
//!   cargo run --release --example sda_nifti -- <target.nii.gz> <output_dir> <stack.nii.gz>... \
//!       [--params params.json]
//!
//! A stack `foo.nii.gz` uses `foo_mask.nii.gz` as its mask when that file exists.
//! The params file holds an `SdaParams` as JSON, e.g.
//! `{"sigma": [1.0, 1.0, 0.5], "use_masks": true, "approach": "Shepard-Deriche"}`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use sda_core::nifti_io::{read_stack, read_volume, save_mask_to_file, save_nifti_to_file, save_volume, NiftiDatatype};
use sda_core::utils::StructuringElement;
use sda_core::{remove_dead_stacks, ScatteredDataApproximation, SdaParams};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn mask_path_for(stack: &Path) -> Option<PathBuf> {
    let name = stack.file_name()?.to_string_lossy().to_string();
    let stem = name.trim_end_matches(".gz").trim_end_matches(".nii");
    let candidate = stack.with_file_name(format!("{}_mask.nii.gz", stem));
    candidate.exists().then_some(candidate)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let params = match args.iter().position(|a| a == "--params") {
        Some(pos) => {
            let file = args.get(pos + 1).ok_or("--params needs a file")?.clone();
            args.remove(pos + 1);
            args.remove(pos);
            serde_json::from_str::<SdaParams>(&std::fs::read_to_string(&file)?)?
        }
        None => SdaParams::default(),
    };
    if args.len() < 3 {
        return Err("usage: sda_nifti <target> <output_dir> <stack>... [--params file.json]".into());
    }
    let target = PathBuf::from(&args[0]);
    let output_dir = PathBuf::from(&args[1]);
    std::fs::create_dir_all(&output_dir)?;

    let total_start = Instant::now();
    let mut stacks = Vec::new();
    for path in args[2..].iter().map(PathBuf::from) {
        let mask = mask_path_for(&path);
        let stack = read_stack(&path, mask.as_deref())?;
        info!(
            stack = stack.name(),
            slices = stack.number_of_slices(),
            masked = mask.is_some(),
            "Loaded stack"
        );
        stacks.push(stack);
    }
    remove_dead_stacks(&mut stacks);
    let volume = read_volume(&target, None)?;
    info!("Loaded {} stacks in {:.2?}", stacks.len(), total_start.elapsed());

    let mut sda = ScatteredDataApproximation::new(stacks, volume, params)?;
    sda.generate_mask_from_stack_mask_unions(1, StructuringElement::Ball)?;
    sda.run()?;

    let stem = sda.setting_specific_filename("SDA_");
    let recon_path = output_dir.join(format!("{}.nii.gz", stem));
    let mask_path = output_dir.join(format!("{}_mask.nii.gz", stem));
    save_volume(sda.reconstruction(), &recon_path, Some(&mask_path))?;
    info!("Saved {}", recon_path.display());

    let maps = sda.uncertainties()?;
    save_nifti_to_file(
        &output_dir.join(format!("{}_uncertainty_raw.nii.gz", stem)),
        &maps.raw,
        &maps.grid,
        NiftiDatatype::Float32,
    )?;
    save_mask_to_file(
        &output_dir.join(format!("{}_uncertainty.nii.gz", stem)),
        &maps.normalized,
        &maps.grid,
    )?;

    info!("Total time: {:.2?}", total_start.elapsed());
    Ok(())
}
