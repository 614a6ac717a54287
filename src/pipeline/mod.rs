// Pipeline module
// Runs the full rhythm analysis and traces its stages

pub mod analyze;
pub mod trace;

pub use analyze::{
    analyze_track, analyze_track_with, analyze_track_with_stems, AnchorTrack, PipelineError,
    RhythmAnalysis, TrackInput,
};
pub use trace::{read_trace_file, PipelineStage, TraceEntry, TraceError, TraceWriter};
