// Onset module
// Per-band onset types and refinement ahead of stream tracking

pub mod refine;
pub mod types;

pub use refine::{
    filter_by_strength, merge_close_band_onsets, merge_close_onsets, refine_track, KeepPolicy,
    RefineConfig,
};
pub use types::{Band, BandOnsets, BandSet, OnsetEvent, PerBand, TrackOnsets};
