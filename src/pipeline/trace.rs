// Pipeline progress tracing
// Append-only JSONL trace of analysis stages; never influences results

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Analysis stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Refine,
    Transient,
    Streams,
    Simplify,
    Layers,
    Sections,
    Roles,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::Refine,
        PipelineStage::Transient,
        PipelineStage::Streams,
        PipelineStage::Simplify,
        PipelineStage::Layers,
        PipelineStage::Sections,
        PipelineStage::Roles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Refine => "refine",
            PipelineStage::Transient => "transient",
            PipelineStage::Streams => "streams",
            PipelineStage::Simplify => "simplify",
            PipelineStage::Layers => "layers",
            PipelineStage::Sections => "sections",
            PipelineStage::Roles => "roles",
        }
    }

    /// Overall run progress once this stage has finished
    pub fn progress(&self) -> f32 {
        let position = PipelineStage::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(0);
        (position + 1) as f32 / PipelineStage::ALL.len() as f32
    }
}

/// A single trace entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp of when this entry was created
    pub timestamp: String,

    /// Stage name (e.g. "refine", "streams", "sections")
    pub stage: String,

    /// Progress [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    /// Optional structured data (stream counts, thresholds, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    /// Create a new trace entry with current timestamp
    pub fn new(stage: String, progress: f32, message: String) -> Self {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            stage,
            progress: progress.clamp(0.0, 1.0),
            message,
            data: None,
        }
    }

    /// Create a trace entry with structured data
    pub fn with_data(stage: String, progress: f32, message: String, data: serde_json::Value) -> Self {
        TraceEntry {
            data: Some(data),
            ..TraceEntry::new(stage, progress, message)
        }
    }

    /// Entry marking a finished pipeline stage
    pub fn stage_done(stage: PipelineStage, message: impl Into<String>, data: serde_json::Value) -> Self {
        TraceEntry::with_data(stage.as_str().to_string(), stage.progress(), message.into(), data)
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Append-only JSONL trace file
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    /// Append a trace entry, creating the file if needed
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        self.write_batch(std::slice::from_ref(entry))
    }

    /// Write multiple entries at once
    pub fn write_batch(&self, entries: &[TraceEntry]) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        for entry in entries {
            let json_line = entry.to_json_line()?;
            file.write_all(json_line.as_bytes())?;
        }

        file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}
