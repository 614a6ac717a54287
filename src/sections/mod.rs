// Sections module
// Timeline partitioning from stream-state changepoints, plus keypoint export

pub mod keypoints;
pub mod segment;

pub use keypoints::{extract_keypoints, Keypoint, KeypointKind};
pub use segment::{
    change_threshold, segment_sections, window_features, Section, SectionConfig, WindowFeatures,
    FEATURE_DIMS,
};
