// Keypoints: section boundaries and stream accents on one sorted timeline

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::segment::Section;
use crate::streams::Stream;

/// Keypoint times are de-duplicated at this resolution (0.1 ms)
const TIME_RESOLUTION: f64 = 1e4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeypointKind {
    SectionBoundary { section_id: usize },
    Accent { stream_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub time: f64,

    #[serde(flatten)]
    pub kind: KeypointKind,
}

/// Section starts and ends first, then stream accents; a time already taken
/// (at 0.1 ms resolution) is skipped. Output is sorted by time.
pub fn extract_keypoints(streams: &[Stream], sections: &[Section]) -> Vec<Keypoint> {
    let mut seen: BTreeSet<i64> = BTreeSet::new();
    let mut keypoints = Vec::new();

    let mut push = |time: f64, kind: KeypointKind| {
        let key = (time * TIME_RESOLUTION).round() as i64;
        if seen.insert(key) {
            keypoints.push(Keypoint {
                time: key as f64 / TIME_RESOLUTION,
                kind,
            });
        }
    };

    for section in sections {
        for time in [section.start, section.end] {
            push(time, KeypointKind::SectionBoundary { section_id: section.id });
        }
    }
    for stream in streams {
        for time in stream.accent_times() {
            push(
                time,
                KeypointKind::Accent {
                    stream_id: stream.id.clone(),
                },
            );
        }
    }

    keypoints.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
    keypoints
}
