// Full-track analysis
// refine -> transient filter -> streams -> simplify -> layers -> sections -> keypoints -> roles

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use super::trace::{PipelineStage, TraceEntry, TraceError, TraceWriter};
use crate::audio::{filter_transient_mid_high, load_band_signals, AudioError, BandSignals};
use crate::config::{AnalysisConfig, ConfigError};
use crate::onsets::{refine_track, Band, PerBand, TrackOnsets};
use crate::roles::{assign_roles_by_band, collect_band_evidence, BandEvidence, RoleComposition, RoleInputs};
use crate::sections::{extract_keypoints, segment_sections, Keypoint, Section};
use crate::streams::{
    apply_stream_layers, assign_stream_layers, build_streams, simplify_dense_streams, Layer, Stream,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Anchor-level signals for role composition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorTrack {
    /// Anchor onset times in seconds
    pub times: Vec<f64>,

    /// Normalized band energies per anchor, each in [0, 1]
    pub energies: Vec<PerBand<f64>>,

    #[serde(default)]
    pub temporal: Option<Vec<f64>>,

    #[serde(default)]
    pub dependency: Option<Vec<f64>>,

    /// Collected from the refined band onsets when absent
    #[serde(default)]
    pub band_evidence: Option<Vec<BandEvidence>>,
}

/// Everything the upstream detector hands over for one track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInput {
    /// Track length in seconds
    pub duration: f64,

    /// Carried for exporters; not used by the analysis
    #[serde(default)]
    pub sample_rate: u32,

    /// Raw per-band onsets
    pub bands: TrackOnsets,

    #[serde(default)]
    pub anchors: Option<AnchorTrack>,
}

/// Result of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmAnalysis {
    pub duration: f64,
    pub streams: Vec<Stream>,
    pub sections: Vec<Section>,
    pub layers: BTreeMap<String, Layer>,
    pub keypoints: Vec<Keypoint>,

    /// One entry per anchor; empty without an anchor track
    pub roles: Vec<RoleComposition>,
}

impl RhythmAnalysis {
    /// Hex SHA-256 of the JSON encoding; equal inputs give equal fingerprints
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

fn record(trace: Option<&TraceWriter>, entry: TraceEntry) -> Result<(), PipelineError> {
    if let Some(writer) = trace {
        writer.write(&entry)?;
    }
    Ok(())
}

fn onset_count(track: &TrackOnsets) -> usize {
    track.values().map(|onsets| onsets.len()).sum()
}

/// Analyze a track with no band signals and no trace
pub fn analyze_track(input: &TrackInput, config: &AnalysisConfig) -> Result<RhythmAnalysis, PipelineError> {
    analyze_track_with(input, config, None, None)
}

/// Load band stems from disk, then analyze
/// A missing stem fails with `AudioError::MissingInput` before any analysis runs.
pub fn analyze_track_with_stems(
    input: &TrackInput,
    config: &AnalysisConfig,
    stems: &BTreeMap<Band, PathBuf>,
    trace: Option<&TraceWriter>,
) -> Result<RhythmAnalysis, PipelineError> {
    let signals = load_band_signals(stems)?;
    analyze_track_with(input, config, Some(&signals), trace)
}

/// Analyze a track
///
/// `signals` enables the mid/high transient filter; `trace` receives one
/// entry per stage.
pub fn analyze_track_with(
    input: &TrackInput,
    config: &AnalysisConfig,
    signals: Option<&BandSignals>,
    trace: Option<&TraceWriter>,
) -> Result<RhythmAnalysis, PipelineError> {
    config.validate()?;
    if !input.duration.is_finite() {
        return Err(PipelineError::InvalidInput(format!(
            "duration must be finite, got {}",
            input.duration
        )));
    }

    log::info!(
        "Analyzing {:.2}s track with {} raw onsets",
        input.duration,
        onset_count(&input.bands)
    );

    // Refine
    let mut onsets = refine_track(&input.bands, &config.refine);
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Refine,
            "Merged and floored onsets",
            serde_json::json!({ "onsets": onset_count(&onsets) }),
        ),
    )?;

    // Transient filter
    if let Some(signals) = signals {
        onsets = filter_transient_mid_high(
            &onsets,
            signals,
            config.refine.transient_window_sec,
            config.refine.transient_ratio_min,
        );
    }
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Transient,
            if signals.is_some() { "Filtered mid/high transients" } else { "No band signals" },
            serde_json::json!({ "onsets": onset_count(&onsets) }),
        ),
    )?;

    // Streams
    let mut streams = build_streams(&onsets, &config.streams);
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Streams,
            format!("Built {} streams", streams.len()),
            serde_json::json!({ "streams": streams.len() }),
        ),
    )?;

    // Simplify
    let simplified = simplify_dense_streams(&mut streams, &config.simplify);
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Simplify,
            format!("Pooled {} dense streams", simplified),
            serde_json::json!({ "simplified": simplified }),
        ),
    )?;

    // Layers
    let layers = assign_stream_layers(&streams);
    apply_stream_layers(&mut streams, &layers);
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Layers,
            "Labelled streams",
            serde_json::to_value(&layers).map_err(TraceError::from)?,
        ),
    )?;

    // Sections + keypoints
    let sections = segment_sections(&streams, input.duration, &config.sections);
    let keypoints = extract_keypoints(&streams, &sections);
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Sections,
            format!("Found {} sections", sections.len()),
            serde_json::json!({ "sections": sections.len(), "keypoints": keypoints.len() }),
        ),
    )?;

    // Roles
    let roles = match &input.anchors {
        Some(anchors) => compose_anchor_roles(anchors, &onsets, config),
        None => Vec::new(),
    };
    record(
        trace,
        TraceEntry::stage_done(
            PipelineStage::Roles,
            format!("Composed roles for {} anchors", roles.len()),
            serde_json::json!({ "anchors": roles.len() }),
        ),
    )?;

    Ok(RhythmAnalysis {
        duration: input.duration,
        streams,
        sections,
        layers,
        keypoints,
        roles,
    })
}

fn compose_anchor_roles(
    anchors: &AnchorTrack,
    onsets: &TrackOnsets,
    config: &AnalysisConfig,
) -> Vec<RoleComposition> {
    if anchors.times.len() != anchors.energies.len() {
        log::warn!(
            "Anchor track has {} times but {} energy rows",
            anchors.times.len(),
            anchors.energies.len()
        );
    }

    let evidence = match &anchors.band_evidence {
        Some(evidence) => evidence.clone(),
        None => collect_band_evidence(&anchors.times, onsets, config.roles.evidence_tolerance_sec),
    };

    let mut inputs = RoleInputs::new(&anchors.energies)
        .with_onset_times(&anchors.times)
        .with_band_evidence(&evidence);
    if let Some(temporal) = &anchors.temporal {
        inputs = inputs.with_temporal(temporal);
    }
    if let Some(dependency) = &anchors.dependency {
        inputs = inputs.with_dependency(dependency);
    }

    assign_roles_by_band(&inputs, &config.roles)
}
