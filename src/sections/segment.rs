// Section segmentation
// Windowed stream-state vectors, L1 changepoints, debounce and merge passes

use serde::{Deserialize, Serialize};

use crate::config::{require_non_negative, require_positive, ConfigError};
use crate::onsets::{Band, BandSet, PerBand};
use crate::stats;
use crate::streams::Stream;

/// Stand-in for a zero MAD so the adaptive threshold stays above the median
const MIN_MAD: f64 = 1e-6;

/// Multiplier on the MAD in the adaptive threshold
const MAD_FACTOR: f64 = 3.0;

/// Number of entries in a window's feature vector
pub const FEATURE_DIMS: usize = 10;

/// Configuration for section segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    /// Sliding window length (seconds)
    pub window_sec: f64,

    /// Window hop (seconds)
    pub hop_sec: f64,

    /// Minimum in-window events for a stream to count in that window
    pub active_threshold: usize,

    /// Fixed changepoint threshold; `None` uses median + 3 x MAD
    pub change_threshold: Option<f64>,

    /// Lower bound on the changepoint threshold
    pub change_floor: f64,

    /// Sections shorter than this are merged with a neighbour when possible
    pub min_section_sec: f64,

    /// Consecutive above-threshold jumps required for a boundary
    pub debounce_windows: usize,

    /// Sections shorter than this are always folded into a neighbour
    pub merge_near_sec: f64,
}

impl Default for SectionConfig {
    fn default() -> Self {
        SectionConfig {
            window_sec: 4.0,
            hop_sec: 1.0,
            active_threshold: 2,
            change_threshold: None,
            change_floor: 0.5,
            min_section_sec: 8.0,
            debounce_windows: 2,
            merge_near_sec: 4.0,
        }
    }
}

impl SectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("window_sec", self.window_sec)?;
        require_positive("hop_sec", self.hop_sec)?;
        if let Some(threshold) = self.change_threshold {
            require_non_negative("change_threshold", threshold)?;
        }
        require_non_negative("change_floor", self.change_floor)?;
        require_non_negative("min_section_sec", self.min_section_sec)?;
        require_non_negative("merge_near_sec", self.merge_near_sec)?;
        if self.debounce_windows == 0 {
            return Err(ConfigError::invalid("debounce_windows", "must be >= 1"));
        }
        Ok(())
    }
}

/// Stream state inside one analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    pub start: f64,
    pub end: f64,

    /// Streams counted in the window, per band
    pub n_streams: PerBand<usize>,

    /// In-window events per second, per band
    pub density: PerBand<f64>,

    /// Bands with a counted stream or enough events
    pub presence: BandSet,

    /// Band with the highest density (lowest band on ties)
    pub dominant_band: Band,

    /// Accents over total events of the counted streams, per band
    pub accent_ratio: PerBand<f64>,
}

impl WindowFeatures {
    /// Numeric vector used for window-to-window distances
    pub fn to_vector(&self) -> [f64; FEATURE_DIMS] {
        [
            self.n_streams.low as f64,
            self.n_streams.mid as f64,
            self.n_streams.high as f64,
            self.density.low,
            self.density.mid,
            self.density.high,
            self.dominant_band.index() as f64,
            self.accent_ratio.low,
            self.accent_ratio.mid,
            self.accent_ratio.high,
        ]
    }

    /// L1 distance between two windows
    pub fn distance(&self, other: &WindowFeatures) -> f64 {
        self.to_vector()
            .iter()
            .zip(other.to_vector().iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }
}

/// Features of the window `[start, end]` (both ends inclusive)
pub fn window_features(streams: &[Stream], start: f64, end: f64, active_threshold: usize) -> WindowFeatures {
    let mut n_streams: PerBand<usize> = PerBand::splat(0);
    let mut events: PerBand<usize> = PerBand::splat(0);
    let mut accents: PerBand<usize> = PerBand::splat(0);
    let mut totals: PerBand<usize> = PerBand::splat(0);

    for stream in streams.iter().filter(|s| s.touches(start, end)) {
        let in_window = stream.events_in(start, end);
        if in_window < active_threshold {
            continue;
        }
        let band = stream.band;
        n_streams.set(band, n_streams.get(band) + 1);
        events.set(band, events.get(band) + in_window);
        totals.set(band, totals.get(band) + stream.len());
        accents.set(band, accents.get(band) + stream.accents.len());
    }

    let span = if end - start > 0.0 { end - start } else { 1.0 };
    let mut density: PerBand<f64> = PerBand::splat(0.0);
    let mut accent_ratio: PerBand<f64> = PerBand::splat(0.0);
    let mut presence = BandSet::new();
    for band in Band::ALL {
        density.set(band, events.get(band) as f64 / span);
        if totals.get(band) > 0 {
            accent_ratio.set(band, accents.get(band) as f64 / totals.get(band) as f64);
        }
        if n_streams.get(band) > 0 || events.get(band) >= active_threshold {
            presence.insert(band);
        }
    }

    WindowFeatures {
        start,
        end,
        n_streams,
        density,
        presence,
        dominant_band: density.argmax(),
        accent_ratio,
    }
}

/// A contiguous part of the track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: usize,
    pub start: f64,
    pub end: f64,

    /// Streams whose span overlaps `(start, end)`
    pub active_stream_ids: Vec<String>,

    /// Features of the window nearest the section midpoint
    pub summary: Option<WindowFeatures>,
}

/// Slide the window over `[0, duration)`; the last window is clipped to the duration
fn compute_windows(streams: &[Stream], duration: f64, config: &SectionConfig) -> Vec<WindowFeatures> {
    let mut windows = Vec::new();
    let mut k = 0usize;

    loop {
        let start = k as f64 * config.hop_sec;
        if start >= duration {
            break;
        }
        let end = (start + config.window_sec).min(duration);
        windows.push(window_features(streams, start, end, config.active_threshold));
        k += 1;
        if end >= duration {
            break;
        }
    }

    windows
}

/// Changepoint threshold for a distance series
pub fn change_threshold(distances: &[f64], config: &SectionConfig) -> f64 {
    let threshold = match config.change_threshold {
        Some(fixed) => fixed,
        None => {
            let med = stats::median_or(distances, 0.0);
            let mut mad = stats::mad(distances).unwrap_or(0.0);
            if mad == 0.0 {
                mad = MIN_MAD;
            }
            med + MAD_FACTOR * mad
        }
    };
    threshold.max(config.change_floor)
}

/// Window indices that open a new section
///
/// Distance `i` compares windows `i` and `i + 1`, so an exceedance marks
/// window `i + 1`. A window is kept once it and the `debounce_windows - 1`
/// windows before it were all marked.
fn debounced_boundaries(distances: &[f64], threshold: f64, debounce_windows: usize) -> Vec<usize> {
    let marked: Vec<bool> = distances.iter().map(|&d| d > threshold).collect();
    let need = debounce_windows.max(1);

    (1..=marked.len())
        .filter(|&window| {
            window >= need && (window + 1 - need..=window).all(|w| marked[w - 1])
        })
        .collect()
}

/// Merge short sections into their neighbours
///
/// Pass 1: a short inner section absorbs the next one when the combined span
/// stays under `2 * merge_near_sec`. Pass 2: any section still shorter than
/// `merge_near_sec` folds into its successor (the last one into its
/// predecessor) until none is left.
fn merge_boundaries(boundaries: &[f64], config: &SectionConfig) -> Vec<f64> {
    let count = boundaries.len();
    let mut merged = vec![boundaries[0]];
    let mut i = 0;
    while i + 1 < count {
        let start = boundaries[i];
        let end = boundaries[i + 1];
        if end - start < config.min_section_sec && i > 0 && i + 2 < count {
            let next_end = boundaries[i + 2];
            if next_end - start < 2.0 * config.merge_near_sec {
                merged.push(next_end);
                i += 2;
                continue;
            }
        }
        merged.push(end);
        i += 1;
    }

    while merged.len() > 2 {
        let sections = merged.len() - 1;
        let Some(short) = (0..sections).find(|&s| merged[s + 1] - merged[s] < config.merge_near_sec) else {
            break;
        };
        if short + 1 < sections {
            merged.remove(short + 1);
        } else {
            merged.remove(short);
        }
    }

    merged
}

/// Sort, de-duplicate and pin the first and last boundary to 0 and `duration`
fn anchor_boundaries(mut boundaries: Vec<f64>, duration: f64) -> Vec<f64> {
    boundaries.retain(|&b| b > 0.0 && b < duration);
    boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    boundaries.dedup();
    boundaries.insert(0, 0.0);
    boundaries.push(duration);
    boundaries
}

fn overlapping_ids(streams: &[Stream], start: f64, end: f64) -> Vec<String> {
    streams
        .iter()
        .filter(|s| s.start < end && s.end > start)
        .map(|s| s.id.clone())
        .collect()
}

fn whole_track(streams: &[Stream], duration: f64, summary: Option<WindowFeatures>) -> Vec<Section> {
    vec![Section {
        id: 0,
        start: 0.0,
        end: duration,
        active_stream_ids: overlapping_ids(streams, 0.0, duration),
        summary,
    }]
}

/// Partition `[0, duration)` into sections
///
/// Sections are sorted, contiguous and non-overlapping, starting at 0 and
/// ending at `duration`. Zero streams, a non-positive duration or fewer than
/// two windows give a single whole-track section, as does a hop that is not
/// positive.
pub fn segment_sections(streams: &[Stream], duration: f64, config: &SectionConfig) -> Vec<Section> {
    if streams.is_empty() || duration <= 0.0 {
        return whole_track(streams, duration, None);
    }
    if !(config.hop_sec > 0.0) {
        log::warn!("Section hop {} is not positive; using one section", config.hop_sec);
        return whole_track(streams, duration, None);
    }

    let windows = compute_windows(streams, duration, config);
    if windows.len() < 2 {
        return whole_track(streams, duration, windows.into_iter().next());
    }

    let distances: Vec<f64> = windows.windows(2).map(|w| w[1].distance(&w[0])).collect();
    let threshold = change_threshold(&distances, config);
    let candidates = debounced_boundaries(&distances, threshold, config.debounce_windows);
    log::debug!(
        "{} windows, threshold {:.3}, debounced boundaries at windows {:?}",
        windows.len(),
        threshold,
        candidates
    );

    let raw: Vec<f64> = candidates.iter().map(|&w| windows[w].start).collect();
    let boundaries = anchor_boundaries(raw, duration);
    let boundaries = anchor_boundaries(merge_boundaries(&boundaries, config), duration);

    let sections: Vec<Section> = boundaries
        .windows(2)
        .enumerate()
        .map(|(id, pair)| {
            let (start, end) = (pair[0], pair[1]);
            let mid = (start + end) / 2.0;
            let nearest = ((mid / config.hop_sec) as usize).min(windows.len() - 1);
            Section {
                id,
                start,
                end,
                active_stream_ids: overlapping_ids(streams, start, end),
                summary: Some(windows[nearest].clone()),
            }
        })
        .collect();

    log::info!("Segmented {:.1}s into {} sections", duration, sections.len());
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamEvent;

    fn regular(id: &str, band: Band, start: f64, end: f64, step: f64) -> Stream {
        let count = ((end - start) / step).round() as usize;
        let events = (0..=count)
            .map(|i| StreamEvent {
                time: start + i as f64 * step,
                strength: 1.0,
            })
            .collect();
        Stream::from_events(id.to_string(), band, events, 0.05)
    }

    fn assert_partition(sections: &[Section], duration: f64) {
        assert!(!sections.is_empty());
        assert_eq!(sections[0].start, 0.0);
        assert_eq!(sections[sections.len() - 1].end, duration);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
        for (i, section) in sections.iter().enumerate() {
            assert_eq!(section.id, i);
        }
    }

    /// Kick throughout, hats joining at the midpoint
    fn two_part_track() -> Vec<Stream> {
        vec![
            regular("low_0", Band::Low, 0.0, 31.5, 0.5),
            regular("high_0", Band::High, 16.0, 31.75, 0.25),
        ]
    }

    #[test]
    fn test_two_halves_give_two_sections() {
        let config = SectionConfig::default();
        let sections = segment_sections(&two_part_track(), 32.0, &config);

        assert_partition(&sections, 32.0);
        assert_eq!(sections.len(), 2);
        let boundary = sections[0].end;
        assert!((boundary - 16.0).abs() <= config.window_sec, "boundary at {}", boundary);
        for section in &sections {
            assert!(section.end - section.start >= config.min_section_sec);
        }

        assert_eq!(sections[0].active_stream_ids, vec!["low_0".to_string()]);
        assert_eq!(
            sections[1].active_stream_ids,
            vec!["low_0".to_string(), "high_0".to_string()]
        );

        let first = sections[0].summary.as_ref().unwrap();
        assert_eq!(first.dominant_band, Band::Low);
        assert_eq!(first.n_streams.high, 0);
        let second = sections[1].summary.as_ref().unwrap();
        assert_eq!(second.dominant_band, Band::High);
        assert_eq!(second.presence.to_vec(), vec![Band::Low, Band::High]);
    }

    #[test]
    fn test_steady_track_is_one_section() {
        let streams = vec![regular("low_0", Band::Low, 0.0, 29.5, 0.5)];
        let sections = segment_sections(&streams, 30.0, &SectionConfig::default());

        assert_partition(&sections, 30.0);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].summary.is_some());
    }

    #[test]
    fn test_no_streams_single_section() {
        let sections = segment_sections(&[], 12.0, &SectionConfig::default());

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].start, 0.0);
        assert_eq!(sections[0].end, 12.0);
        assert!(sections[0].active_stream_ids.is_empty());
        assert!(sections[0].summary.is_none());
    }

    #[test]
    fn test_non_positive_duration_single_section() {
        let sections = segment_sections(&two_part_track(), 0.0, &SectionConfig::default());
        assert_eq!(sections.len(), 1);
        assert!(sections[0].summary.is_none());
    }

    #[test]
    fn test_non_positive_hop_single_section() {
        for hop_sec in [0.0, -1.0] {
            let config = SectionConfig {
                hop_sec,
                ..SectionConfig::default()
            };
            let sections = segment_sections(&two_part_track(), 32.0, &config);

            assert_partition(&sections, 32.0);
            assert_eq!(sections.len(), 1);
            assert_eq!(
                sections[0].active_stream_ids,
                vec!["low_0".to_string(), "high_0".to_string()]
            );
        }
    }

    #[test]
    fn test_short_track_single_window() {
        let streams = vec![regular("low_0", Band::Low, 0.0, 2.5, 0.5)];
        let sections = segment_sections(&streams, 3.0, &SectionConfig::default());

        assert_partition(&sections, 3.0);
        assert_eq!(sections.len(), 1);
        let summary = sections[0].summary.as_ref().unwrap();
        assert_eq!(summary.end, 3.0);
        assert_eq!(summary.n_streams.low, 1);
    }

    #[test]
    fn test_window_features() {
        let streams = vec![
            regular("low_0", Band::Low, 0.0, 8.0, 0.5),
            regular("high_0", Band::High, 3.5, 8.0, 0.25),
        ];

        let features = window_features(&streams, 0.0, 4.0, 2);

        // Low: 0.0..=4.0 -> 9 events; high: 3.5, 3.75, 4.0 -> 3 events
        assert_eq!(features.n_streams.low, 1);
        assert_eq!(features.n_streams.high, 1);
        assert!((features.density.low - 2.25).abs() < 1e-9);
        assert!((features.density.high - 0.75).abs() < 1e-9);
        assert_eq!(features.dominant_band, Band::Low);
        assert_eq!(features.presence.to_vec(), vec![Band::Low, Band::High]);

        // A single in-window event is below the active threshold
        let sparse = window_features(&streams, 0.0, 3.5, 2);
        assert_eq!(sparse.n_streams.high, 0);
        assert!(!sparse.presence.contains(Band::High));
    }

    #[test]
    fn test_threshold_floor_and_override() {
        let config = SectionConfig::default();
        assert_eq!(change_threshold(&[0.0, 0.0, 0.0], &config), 0.5);
        // median 2, MAD 1 -> 5
        assert_eq!(change_threshold(&[1.0, 2.0, 3.0, 10.0, 2.0], &config), 5.0);

        let fixed = SectionConfig {
            change_threshold: Some(0.2),
            ..SectionConfig::default()
        };
        assert_eq!(change_threshold(&[10.0, 20.0], &fixed), 0.5);
    }

    #[test]
    fn test_debounce_requires_consecutive_jumps() {
        let distances = [0.0, 2.0, 0.0, 2.0, 2.0, 0.0];
        assert_eq!(debounced_boundaries(&distances, 0.5, 2), vec![5]);
        assert_eq!(debounced_boundaries(&distances, 0.5, 1), vec![2, 4, 5]);
    }

    #[test]
    fn test_merge_passes() {
        let config = SectionConfig::default();

        // Short inner section absorbs its successor: [14, 15] + [15, 16]
        let merged = merge_boundaries(&[0.0, 14.0, 15.0, 16.0, 32.0], &config);
        assert_eq!(merged, vec![0.0, 14.0, 32.0]);

        // Short last section folds back into its predecessor
        let merged = merge_boundaries(&[0.0, 20.0, 22.0], &config);
        assert_eq!(merged, vec![0.0, 22.0]);
    }
}
