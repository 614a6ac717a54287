// Onset refinement
// Merges near-duplicate onsets per band and drops weak ones before stream tracking

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::{require_non_negative, require_positive, ConfigError};
use super::types::{Band, BandOnsets, PerBand, TrackOnsets};

/// Which onset represents a merged cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    /// The strongest onset of the cluster (earliest on ties)
    Strongest,

    /// The first onset of the cluster
    First,
}

/// Configuration for per-band onset refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Onsets closer than this (seconds) are merged, per band
    /// Mid/high use wider windows to suppress shaker/clap over-detection
    pub merge_close_sec: PerBand<f64>,

    /// Strength floor for the low band (0 disables)
    pub strength_floor: f64,

    /// Strength floor for mid and high bands (0 disables)
    pub strength_floor_mid_high: f64,

    /// Pre/post attack window for the transient filter, in seconds
    pub transient_window_sec: f64,

    /// Minimum post/pre RMS ratio for a mid/high onset to count as an attack
    pub transient_ratio_min: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            merge_close_sec: PerBand::new(0.03, 0.10, 0.08),
            strength_floor: 0.05,
            strength_floor_mid_high: 0.15,
            transient_window_sec: 0.02,
            transient_ratio_min: 1.5,
        }
    }
}

impl RefineConfig {
    /// Strength floor that applies to a band
    pub fn strength_floor_for(&self, band: Band) -> f64 {
        if band.is_mid_or_high() {
            self.strength_floor_mid_high
        } else {
            self.strength_floor
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("merge_close_sec.low", self.merge_close_sec.low)?;
        require_non_negative("merge_close_sec.mid", self.merge_close_sec.mid)?;
        require_non_negative("merge_close_sec.high", self.merge_close_sec.high)?;
        require_positive("transient_window_sec", self.transient_window_sec)?;
        require_non_negative("transient_ratio_min", self.transient_ratio_min)?;
        Ok(())
    }
}

/// Indices of `times` in ascending time order (stable)
fn time_order(times: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].partial_cmp(&times[b]).unwrap_or(Ordering::Equal));
    order
}

/// Merge onsets closer than `min_separation` into one representative
///
/// Algorithm:
/// 1. Sort by time
/// 2. Grow a cluster while consecutive gaps are <= `min_separation`
/// 3. Emit one onset per cluster according to `keep`
///
/// Output times are sorted and consecutive gaps exceed `min_separation`,
/// so running the merge again on its own output changes nothing.
/// Missing or mismatched strengths are treated as all zeros.
pub fn merge_close_onsets(
    times: &[f64],
    strengths: &[f64],
    min_separation: f64,
    keep: KeepPolicy,
) -> BandOnsets {
    if times.is_empty() {
        return BandOnsets::default();
    }

    if !strengths.is_empty() && strengths.len() != times.len() {
        log::warn!(
            "Strength array length {} does not match {} onsets; using zeros",
            strengths.len(),
            times.len()
        );
    }
    let onsets = BandOnsets::new(times.to_vec(), strengths.to_vec());
    let raw_strengths = onsets.strengths_or(0.0);

    let order = time_order(times);
    let sorted_times: Vec<f64> = order.iter().map(|&i| times[i]).collect();
    let sorted_strengths: Vec<f64> = order.iter().map(|&i| raw_strengths[i]).collect();

    let mut merged = BandOnsets::default();
    let n = sorted_times.len();
    let mut i = 0;

    while i < n {
        let mut j = i + 1;
        while j < n && sorted_times[j] - sorted_times[j - 1] <= min_separation {
            j += 1;
        }

        let representative = match keep {
            KeepPolicy::Strongest => {
                let mut best = i;
                for k in (i + 1)..j {
                    if sorted_strengths[k] > sorted_strengths[best] {
                        best = k;
                    }
                }
                best
            }
            KeepPolicy::First => i,
        };

        merged.times.push(sorted_times[representative]);
        merged.strengths.push(sorted_strengths[representative]);
        i = j;
    }

    merged
}

/// Drop onsets whose strength is below `floor`
/// A floor <= 0 keeps everything. Mismatched strengths count as zeros.
pub fn filter_by_strength(times: &[f64], strengths: &[f64], floor: f64) -> BandOnsets {
    let onsets = BandOnsets::new(times.to_vec(), strengths.to_vec());
    let aligned = onsets.strengths_or(0.0);

    if floor <= 0.0 {
        return BandOnsets::new(onsets.times, aligned);
    }

    let mut kept = BandOnsets::default();
    for (&time, &strength) in times.iter().zip(aligned.iter()) {
        if strength >= floor {
            kept.times.push(time);
            kept.strengths.push(strength);
        }
    }
    kept
}

/// Merge close onsets in every band with that band's window (keep strongest)
pub fn merge_close_band_onsets(track: &TrackOnsets, merge_close_sec: &PerBand<f64>) -> TrackOnsets {
    track
        .iter()
        .map(|(&band, onsets)| {
            let merged = merge_close_onsets(
                &onsets.times,
                &onsets.strengths,
                merge_close_sec.get(band),
                KeepPolicy::Strongest,
            );
            (band, merged)
        })
        .collect()
}

/// Full per-band refinement: merge close onsets, then apply the band's strength floor
pub fn refine_track(track: &TrackOnsets, config: &RefineConfig) -> TrackOnsets {
    let merged = merge_close_band_onsets(track, &config.merge_close_sec);

    merged
        .into_iter()
        .map(|(band, onsets)| {
            let before = onsets.len();
            let filtered =
                filter_by_strength(&onsets.times, &onsets.strengths, config.strength_floor_for(band));
            log::debug!(
                "Refined {} band: {} raw -> {} merged -> {} kept",
                band,
                track.get(&band).map(|o| o.len()).unwrap_or(0),
                before,
                filtered.len()
            );
            (band, filtered)
        })
        .collect()
}
