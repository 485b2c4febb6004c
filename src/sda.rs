//! Scattered data approximation reconstruction
//!
//! Discrete Shepard-like reconstruction of a volume from oriented slices:
//!
//! ```text
//! x = G_sigma * N / G_sigma * D
//! ```
//!
//! where N sums the slice intensities falling into each voxel, D counts them,
//! and G_sigma is a recursive Gaussian. Voxels without samples get D = 1
//! before smoothing so they inherit the neighbourhood average.
//!
//! Reference:
//! Vercauteren, T. et al. (2006). "Robust mosaicing with correction of motion
//! distortions and tissue deformations for in vivo fibered microscopy."
//! Medical Image Analysis, 10(5):673-692.

use std::str::FromStr;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accumulate::{accumulate_with_progress, FILL_VALUE};
use crate::error::{Result, SdaError};
use crate::resample::{NearestNeighborResampler, SliceResampler};
use crate::smoothing::SmoothingApproach;
use crate::stack::{SliceSource, Stack};
use crate::uncertainty::{compute_uncertainty_maps, UncertaintyMaps};
use crate::utils::mask::{binary_dilate, intersect_into, union_into, StructuringElement};
use crate::utils::threshold::{MaskEstimator, ThresholdMaskEstimator};
use crate::volume::Volume;

/// Smoothed denominators at or below this value yield 0
pub const DENOMINATOR_EPSILON: f64 = 1e-8;

/// Gaussian standard deviation, isotropic or per axis, in mm
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sigma {
    Isotropic(f64),
    PerAxis(Vec<f64>),
}

impl Sigma {
    /// Validated per-axis sigma
    pub fn to_array(&self) -> Result<[f64; 3]> {
        let sigma = match self {
            Sigma::Isotropic(s) => [*s; 3],
            Sigma::PerAxis(v) => match v.as_slice() {
                &[x, y, z] => [x, y, z],
                _ => return Err(SdaError::SigmaLength { len: v.len() }),
            },
        };
        for (axis, &value) in sigma.iter().enumerate() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SdaError::InvalidSigma { axis, value });
            }
        }
        Ok(sigma)
    }
}

/// What unsampled voxels hold after reconstruction
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum UnsampledPolicy {
    /// Keep the smoothed ratio obtained with D forced to one
    #[default]
    ForceOne,
    /// Overwrite voxels without any sample with a no-data value
    Fill(f64),
}

/// Reconstruction parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdaParams {
    /// Smoothing sigma in mm
    pub sigma: Sigma,
    /// Multiply slice intensities by their masks
    pub use_masks: bool,
    /// Reconstruct a mask from slice masks instead of intensities
    pub sda_mask: bool,
    /// Recursive Gaussian variant
    pub approach: SmoothingApproach,
    /// Handling of voxels no slice reached
    pub unsampled: UnsampledPolicy,
}

impl Default for SdaParams {
    fn default() -> Self {
        Self {
            sigma: Sigma::Isotropic(1.0),
            use_masks: false,
            sda_mask: false,
            approach: SmoothingApproach::Yvv,
            unsampled: UnsampledPolicy::ForceOne,
        }
    }
}

impl SdaParams {
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Sigma::Isotropic(sigma);
        self
    }

    pub fn with_sigma_array(mut self, sigma: &[f64]) -> Self {
        self.sigma = Sigma::PerAxis(sigma.to_vec());
        self
    }

    pub fn with_use_masks(mut self, use_masks: bool) -> Self {
        self.use_masks = use_masks;
        self
    }

    pub fn with_sda_mask(mut self, sda_mask: bool) -> Self {
        self.sda_mask = sda_mask;
        self
    }

    pub fn with_approach(mut self, approach: SmoothingApproach) -> Self {
        self.approach = approach;
        self
    }

    pub fn with_unsampled(mut self, policy: UnsampledPolicy) -> Self {
        self.unsampled = policy;
        self
    }

    /// Check the configuration and return the per-axis sigma
    pub fn validate(&self) -> Result<[f64; 3]> {
        self.sigma.to_array()
    }

    /// Slice signal selected by the mask switches
    pub fn source(&self) -> SliceSource {
        SliceSource::from_flags(self.use_masks, self.sda_mask)
    }
}

/// Divide smoothed numerator by smoothed denominator
///
/// # Returns
/// The ratio and the number of voxels whose denominator fell to or below
/// [`DENOMINATOR_EPSILON`] (set to 0)
pub fn shepard_ratio(numerator: &[f64], denominator: &[f64]) -> (Vec<f64>, usize) {
    let ratio = numerator
        .par_iter()
        .zip(denominator.par_iter())
        .map(|(&n, &d)| if d > DENOMINATOR_EPSILON { n / d } else { 0.0 })
        .collect();
    let guarded = denominator.iter().filter(|&&d| !(d > DENOMINATOR_EPSILON)).count();
    (ratio, guarded)
}

/// Scattered data approximation engine
///
/// Owns the stacks and the target volume. [`run`](Self::run) replaces the
/// target's intensities (or its mask in mask mode); uncertainty maps are
/// computed on first request and dropped by the next run.
pub struct ScatteredDataApproximation {
    stacks: Vec<Stack>,
    volume: Volume,
    params: SdaParams,
    sigma: [f64; 3],
    resampler: Box<dyn SliceResampler>,
    mask_estimator: Box<dyn MaskEstimator>,
    computational_time: Option<Duration>,
    uncertainty: Option<UncertaintyMaps>,
}

impl ScatteredDataApproximation {
    /// # Arguments
    /// * `stacks` - Input stacks with known slice poses
    /// * `volume` - Target volume defining the reconstruction grid
    /// * `params` - Reconstruction parameters, validated here
    pub fn new(stacks: Vec<Stack>, volume: Volume, params: SdaParams) -> Result<Self> {
        let sigma = params.validate()?;
        volume.grid.validate()?;
        SdaError::check_len("volume data", volume.n_total(), volume.data.len())?;
        SdaError::check_len("volume mask", volume.n_total(), volume.mask.len())?;

        Ok(Self {
            stacks,
            volume,
            params,
            sigma,
            resampler: Box::new(NearestNeighborResampler),
            mask_estimator: Box::new(ThresholdMaskEstimator::default()),
            computational_time: None,
            uncertainty: None,
        })
    }

    /// Replace the slice resampler
    pub fn with_resampler(mut self, resampler: Box<dyn SliceResampler>) -> Self {
        self.resampler = resampler;
        self.uncertainty = None;
        self
    }

    /// Replace the estimator used in mask mode
    pub fn with_mask_estimator(mut self, estimator: Box<dyn MaskEstimator>) -> Self {
        self.mask_estimator = estimator;
        self
    }

    /// Reconstruct the target volume
    pub fn run(&mut self) -> Result<()> {
        self.run_with_progress(|_, _| {})
    }

    /// Reconstruct with a callback receiving `(stacks_done, stacks_total)`
    pub fn run_with_progress<F>(&mut self, mut progress_callback: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let sigma = self.sigma;
        let approach = self.params.approach;
        let source = self.params.source();
        info!("Chosen SDA approach: {}", approach);
        info!("Smoothing parameter sigma = {:?}", sigma);

        let start = Instant::now();
        let grid = &self.volume.grid;

        let mut pair = accumulate_with_progress(
            &self.stacks,
            grid,
            source,
            self.resampler.as_ref(),
            |done, total| {
                info!("Stack {}/{}", done, total);
                progress_callback(done, total);
            },
        )?;
        let unsampled = pair.guard_zero_denominator();
        debug!(
            unsampled = unsampled.iter().filter(|&&u| u).count(),
            voxels = pair.len(),
            "Accumulation finished"
        );

        let filter = approach.filter();
        let filter = filter.as_ref();
        let (numerator, denominator) = rayon::join(
            || filter.smooth(&pair.numerator, grid, sigma),
            || filter.smooth(&pair.denominator, grid, sigma),
        );

        let (mut estimate, guarded) = shepard_ratio(&numerator, &denominator);
        if guarded > 0 {
            warn!(voxels = guarded, "Smoothed denominator below epsilon, set to 0");
        }

        if let UnsampledPolicy::Fill(value) = self.params.unsampled {
            for (v, &empty) in estimate.iter_mut().zip(&unsampled) {
                if empty {
                    *v = value;
                }
            }
        }

        if self.params.sda_mask {
            let mask = self.mask_estimator.estimate(&estimate, grid);
            self.volume.set_mask(mask)?;
        } else {
            self.volume.set_data(estimate)?;
        }

        let elapsed = start.elapsed();
        self.computational_time = Some(elapsed);
        self.uncertainty = None;
        info!("Required computational time: {:.3?}", elapsed);
        Ok(())
    }

    /// Current estimate of the target volume
    pub fn reconstruction(&self) -> &Volume {
        &self.volume
    }

    pub fn into_reconstruction(self) -> Volume {
        self.volume
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Mutable access to the stacks, e.g. to delete outlier slices
    pub fn stacks_mut(&mut self) -> &mut Vec<Stack> {
        self.uncertainty = None;
        &mut self.stacks
    }

    pub fn set_stacks(&mut self, stacks: Vec<Stack>) {
        self.stacks = stacks;
        self.uncertainty = None;
    }

    pub fn params(&self) -> &SdaParams {
        &self.params
    }

    /// Isotropic sigma in mm
    pub fn set_sigma(&mut self, sigma: f64) -> Result<()> {
        self.set_sigma_value(Sigma::Isotropic(sigma))
    }

    /// Per-axis sigma in mm; must have exactly three entries
    pub fn set_sigma_array(&mut self, sigma: &[f64]) -> Result<()> {
        self.set_sigma_value(Sigma::PerAxis(sigma.to_vec()))
    }

    fn set_sigma_value(&mut self, sigma: Sigma) -> Result<()> {
        self.sigma = sigma.to_array()?;
        self.params.sigma = sigma;
        self.uncertainty = None;
        Ok(())
    }

    pub fn sigma_array(&self) -> [f64; 3] {
        self.sigma
    }

    /// Select the approach by name ("Shepard-YVV", "Shepard-Deriche", ...)
    pub fn set_approach(&mut self, approach: &str) -> Result<()> {
        self.params.approach = SmoothingApproach::from_str(approach)?;
        self.uncertainty = None;
        Ok(())
    }

    pub fn approach(&self) -> SmoothingApproach {
        self.params.approach
    }

    pub fn set_use_masks(&mut self, use_masks: bool) {
        self.params.use_masks = use_masks;
        self.uncertainty = None;
    }

    pub fn set_sda_mask(&mut self, sda_mask: bool) {
        self.params.sda_mask = sda_mask;
        self.uncertainty = None;
    }

    /// Wall-clock duration of the last run
    pub fn computational_time(&self) -> Option<Duration> {
        self.computational_time
    }

    /// Raw and normalized uncertainty maps, computed on first request
    pub fn uncertainties(&mut self) -> Result<&UncertaintyMaps> {
        let maps = match self.uncertainty.take() {
            Some(maps) => maps,
            None => {
                let filter = self.params.approach.filter();
                compute_uncertainty_maps(
                    &self.stacks,
                    &self.volume.grid,
                    &self.volume.mask,
                    self.params.source(),
                    self.resampler.as_ref(),
                    filter.as_ref(),
                    self.sigma,
                )?
            }
        };
        Ok(self.uncertainty.insert(maps))
    }

    /// File name stem describing the setting, e.g. `SDA_stacks3_sigma1p5`
    ///
    /// Only the first sigma component is included.
    pub fn setting_specific_filename(&self, prefix: &str) -> String {
        let s = self.sigma[0];
        let sigma = if s.fract() == 0.0 { format!("{:.1}", s) } else { s.to_string() };
        format!("{}stacks{}_sigma{}", prefix, self.stacks.len(), sigma).replace('.', "p")
    }

    /// Install the union of all stack masks as the target mask
    ///
    /// # Arguments
    /// * `dilation_radius` - Dilation radius in voxels; 0 disables dilation
    /// * `kernel` - Structuring element used for dilation
    pub fn generate_mask_from_stack_mask_unions(
        &mut self,
        dilation_radius: usize,
        kernel: StructuringElement,
    ) -> Result<()> {
        self.generate_joint_mask(dilation_radius, kernel, false)
    }

    /// Install the intersection of all stack masks as the target mask
    pub fn generate_mask_from_stack_mask_intersections(
        &mut self,
        dilation_radius: usize,
        kernel: StructuringElement,
    ) -> Result<()> {
        self.generate_joint_mask(dilation_radius, kernel, true)
    }

    fn generate_joint_mask(
        &mut self,
        dilation_radius: usize,
        kernel: StructuringElement,
        intersect: bool,
    ) -> Result<()> {
        let grid = &self.volume.grid;
        let n_total = grid.n_total();
        let resampler = self.resampler.as_ref();

        let stack_masks: Vec<Vec<u8>> = self
            .stacks
            .par_iter()
            .map(|stack| {
                let mut mask = vec![0u8; n_total];
                for slice in stack.slices() {
                    let values = slice.source_values(SliceSource::Mask);
                    let image = resampler.resample(&values, &slice.grid(), grid, FILL_VALUE);
                    for &(idx, v) in &image.voxels {
                        if v > FILL_VALUE {
                            mask[idx] = 1;
                        }
                    }
                }
                mask
            })
            .collect();

        let mut joint = vec![u8::from(intersect); n_total];
        for mask in &stack_masks {
            if intersect {
                intersect_into(&mut joint, mask);
            } else {
                union_into(&mut joint, mask);
            }
        }

        let (nx, ny, nz) = grid.dims;
        let joint = binary_dilate(&joint, nx, ny, nz, kernel, dilation_radius);
        info!(
            stacks = self.stacks.len(),
            mode = if intersect { "intersection" } else { "union" },
            kernel = %kernel,
            radius = dilation_radius,
            voxels = joint.iter().filter(|&&m| m > 0).count(),
            "Joint stack mask"
        );

        self.volume.set_mask(joint)?;
        self.uncertainty = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{idx3d, Grid, RigidTransform};
    use crate::stack::Slice;
    use glam::DVec3;

    fn volume() -> Volume {
        Volume::new(Grid::new((4, 4, 4), (1.0, 1.0, 1.0), DVec3::ZERO)).unwrap()
    }

    fn point_stack(name: &str, values: &[(f64, (usize, usize, usize))]) -> Stack {
        let slices = values
            .iter()
            .enumerate()
            .map(|(n, &(v, (i, j, k)))| {
                Slice::new(
                    vec![v],
                    (1, 1),
                    (1.0, 1.0, 1.0),
                    RigidTransform::from_translation(DVec3::new(i as f64, j as f64, k as f64)),
                    n,
                )
                .unwrap()
            })
            .collect();
        Stack::new(name, slices)
    }

    #[test]
    fn test_sigma_validation() {
        assert_eq!(Sigma::Isotropic(2.0).to_array().unwrap(), [2.0; 3]);
        assert_eq!(Sigma::PerAxis(vec![1.0, 2.0, 3.0]).to_array().unwrap(), [1.0, 2.0, 3.0]);
        assert!(matches!(
            Sigma::PerAxis(vec![1.0, 2.0]).to_array(),
            Err(SdaError::SigmaLength { len: 2 })
        ));
        assert!(matches!(
            Sigma::PerAxis(vec![1.0, -1.0, 1.0]).to_array(),
            Err(SdaError::InvalidSigma { axis: 1, .. })
        ));
        assert!(Sigma::Isotropic(f64::NAN).to_array().is_err());
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let params = SdaParams::default().with_sigma_array(&[1.0, 1.0]);
        assert!(ScatteredDataApproximation::new(Vec::new(), volume(), params).is_err());
    }

    #[test]
    fn test_params_json() {
        let params: SdaParams =
            serde_json::from_str(r#"{"sigma": [1.0, 2.0, 0.5], "approach": "Shepard-Deriche"}"#).unwrap();
        assert_eq!(params.validate().unwrap(), [1.0, 2.0, 0.5]);
        assert_eq!(params.approach, SmoothingApproach::Deriche);
        assert!(!params.use_masks);

        let params: SdaParams = serde_json::from_str(r#"{"sigma": 0.8}"#).unwrap();
        assert_eq!(params.validate().unwrap(), [0.8; 3]);
        assert!(serde_json::from_str::<SdaParams>(r#"{"approach": "Shepard-Box"}"#).is_err());
    }

    #[test]
    fn test_shepard_ratio_guard() {
        let (ratio, guarded) = shepard_ratio(&[2.0, 3.0, 1.0], &[1.0, 0.0, 1e-12]);
        assert_eq!(ratio, vec![2.0, 0.0, 0.0]);
        assert_eq!(guarded, 2);
    }

    #[test]
    fn test_two_samples_sigma_zero() {
        let stacks = vec![point_stack("s", &[(3.0, (1, 1, 1)), (5.0, (1, 1, 1))])];
        let params = SdaParams::default().with_sigma(0.0);
        let mut sda = ScatteredDataApproximation::new(stacks, volume(), params).unwrap();
        sda.run().unwrap();

        let data = &sda.reconstruction().data;
        let idx = idx3d(1, 1, 1, 4, 4);
        assert!((data[idx] - 4.0).abs() < 1e-12);
        for (i, &v) in data.iter().enumerate() {
            if i != idx {
                assert_eq!(v, 0.0);
            }
        }
        assert!(sda.computational_time().is_some());
    }

    #[test]
    fn test_zero_stacks_gives_zero() {
        let mut sda = ScatteredDataApproximation::new(Vec::new(), volume(), SdaParams::default()).unwrap();
        sda.run().unwrap();
        assert!(sda.reconstruction().data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_fill_policy() {
        let stacks = vec![point_stack("s", &[(6.0, (0, 0, 0))])];
        let params = SdaParams::default()
            .with_sigma(0.0)
            .with_unsampled(UnsampledPolicy::Fill(-1.0));
        let mut sda = ScatteredDataApproximation::new(stacks, volume(), params).unwrap();
        sda.run().unwrap();
        let data = &sda.reconstruction().data;
        assert_eq!(data[0], 6.0);
        assert!(data[1..].iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_setters() {
        let mut sda = ScatteredDataApproximation::new(
            vec![point_stack("a", &[(1.0, (0, 0, 0))]), point_stack("b", &[(1.0, (0, 0, 0))])],
            volume(),
            SdaParams::default(),
        )
        .unwrap();

        assert_eq!(sda.approach(), SmoothingApproach::Yvv);
        sda.set_approach("Shepard-Deriche").unwrap();
        assert_eq!(sda.approach(), SmoothingApproach::Deriche);
        assert!(sda.set_approach("Shepard-Box").is_err());
        assert_eq!(sda.approach(), SmoothingApproach::Deriche);

        sda.set_sigma_array(&[0.5, 1.0, 2.0]).unwrap();
        assert_eq!(sda.sigma_array(), [0.5, 1.0, 2.0]);
        assert!(sda.set_sigma_array(&[1.0]).is_err());
        assert_eq!(sda.sigma_array(), [0.5, 1.0, 2.0]);
        assert_eq!(sda.setting_specific_filename("SDA_"), "SDA_stacks2_sigma0p5");

        sda.set_sigma(1.0).unwrap();
        assert_eq!(sda.setting_specific_filename("SDA_"), "SDA_stacks2_sigma1p0");
        assert!(sda.set_sigma(-0.1).is_err());
    }

    #[test]
    fn test_mask_mode_replaces_mask_only() {
        let slice = Slice::new(
            vec![9.0; 16],
            (4, 4),
            (1.0, 1.0, 1.0),
            RigidTransform::from_translation(DVec3::new(0.0, 0.0, 2.0)),
            0,
        )
        .unwrap()
        .with_mask((0..16).map(|i| u8::from(i < 8)).collect())
        .unwrap();
        let mut vol = volume();
        vol.data = vec![7.0; 64];

        let params = SdaParams::default().with_sigma(0.0).with_sda_mask(true);
        let mut sda = ScatteredDataApproximation::new(vec![Stack::new("s", vec![slice])], vol, params).unwrap();
        sda.run().unwrap();

        let rec = sda.reconstruction();
        assert!(rec.data.iter().all(|&v| v == 7.0));
        assert_eq!(rec.mask_count(), 8);
        assert_eq!(rec.mask[idx3d(0, 0, 2, 4, 4)], 1);
        assert_eq!(rec.mask[idx3d(0, 3, 2, 4, 4)], 0);
    }

    #[test]
    fn test_uncertainty_cache_invalidated_by_run() {
        let stacks = vec![point_stack("s", &[(1.0, (1, 1, 1))])];
        let mut sda = ScatteredDataApproximation::new(stacks, volume(), SdaParams::default().with_sigma(0.0)).unwrap();
        sda.run().unwrap();
        assert_eq!(sda.uncertainties().unwrap().stack_count, 1);
        assert!(sda.uncertainty.is_some());
        sda.run().unwrap();
        assert!(sda.uncertainty.is_none());
        let maps = sda.uncertainties().unwrap();
        assert_eq!(maps.raw[idx3d(1, 1, 1, 4, 4)], 1.0);
        assert!(maps.normalized.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_joint_masks() {
        let a = point_stack("a", &[(1.0, (0, 0, 0)), (1.0, (1, 0, 0))]);
        let b = point_stack("b", &[(1.0, (1, 0, 0)), (1.0, (2, 0, 0))]);
        let mut sda = ScatteredDataApproximation::new(vec![a, b], volume(), SdaParams::default()).unwrap();

        sda.generate_mask_from_stack_mask_unions(0, StructuringElement::Ball).unwrap();
        assert_eq!(sda.reconstruction().mask_count(), 3);

        sda.generate_mask_from_stack_mask_intersections(0, StructuringElement::Ball).unwrap();
        assert_eq!(sda.reconstruction().mask_count(), 1);
        assert_eq!(sda.reconstruction().mask[1], 1);

        sda.generate_mask_from_stack_mask_intersections(1, StructuringElement::Cross).unwrap();
        // (1,0,0) plus its in-grid axis neighbours
        assert_eq!(sda.reconstruction().mask_count(), 5);
    }
}
