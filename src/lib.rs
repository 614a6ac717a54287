// Rhythm Streams - per-band onsets to rhythm streams, roles and sections
// Module declarations

pub mod audio;
pub mod config;
pub mod onsets;
pub mod pipeline;
pub mod roles;
pub mod sections;
pub mod stats;
pub mod streams;

pub use config::{AnalysisConfig, ConfigError};
pub use onsets::{Band, BandOnsets, BandSet, OnsetEvent, PerBand, TrackOnsets};
pub use pipeline::{
    analyze_track, analyze_track_with, analyze_track_with_stems, AnchorTrack, PipelineError,
    RhythmAnalysis, TrackInput,
};
pub use roles::{assign_roles_by_band, RoleComposition, RoleInputs, RoleStrategy};
pub use sections::{segment_sections, Keypoint, Section};
pub use streams::{build_streams, Layer, Stream, StreamEvent};
