//! Mask helpers shared by the reconstruction engine

pub mod mask;
pub mod threshold;

pub use mask::{binary_dilate, intersect_into, union_into, StructuringElement};
pub use threshold::{otsu_threshold, MaskEstimator, ThresholdMaskEstimator, ThresholdMethod};
