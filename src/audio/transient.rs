// Transient shape filter for mid/high onsets
// Keeps onsets whose post-attack energy clearly exceeds the pre-attack energy,
// dropping steady shaker/clap texture the detector fired on

use super::ingest::{BandSignal, BandSignals};
use crate::onsets::{BandOnsets, TrackOnsets};

const RMS_EPS: f64 = 1e-10;

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Whether the onset at `time` looks like a genuine attack in `signal`
///
/// Compares RMS over `[t - w, t)` with RMS over `[t, t + w)`; the window is
/// clamped to a quarter of the signal. Onsets without two samples on either
/// side are rejected.
pub fn is_attack(signal: &BandSignal, time: f64, window_sec: f64, ratio_min: f64) -> bool {
    let n = signal.samples.len();
    let sr = signal.sample_rate as f64;
    if n == 0 || sr <= 0.0 {
        return false;
    }

    let w = ((window_sec * sr).round() as usize).min(n / 4).max(1);
    let center = (time * sr).round();
    if center < 0.0 {
        return false;
    }
    let center = (center as usize).min(n);

    let pre = &signal.samples[center.saturating_sub(w)..center];
    let post = &signal.samples[center..(center + w).min(n)];
    if pre.len() < 2 || post.len() < 2 {
        return false;
    }

    let pre_rms = rms(pre) + RMS_EPS;
    let post_rms = rms(post) + RMS_EPS;
    post_rms / pre_rms >= ratio_min
}

/// Filter one band's onsets by attack shape
pub fn filter_band_transients(
    onsets: &BandOnsets,
    signal: &BandSignal,
    window_sec: f64,
    ratio_min: f64,
) -> BandOnsets {
    let strengths = onsets.strengths_or(1.0);
    let mut kept = BandOnsets::default();

    for (&time, &strength) in onsets.times.iter().zip(strengths.iter()) {
        if is_attack(signal, time, window_sec, ratio_min) {
            kept.times.push(time);
            kept.strengths.push(strength);
        }
    }
    kept
}

/// Apply the transient filter to the mid and high bands that have a signal
/// The low band is never touched: kicks and snares are attack-dominant already
pub fn filter_transient_mid_high(
    track: &TrackOnsets,
    signals: &BandSignals,
    window_sec: f64,
    ratio_min: f64,
) -> TrackOnsets {
    track
        .iter()
        .map(|(&band, onsets)| {
            let filtered = match signals.get(&band) {
                Some(signal) if band.is_mid_or_high() && !onsets.is_empty() => {
                    let filtered = filter_band_transients(onsets, signal, window_sec, ratio_min);
                    log::debug!(
                        "Transient filter on {} band kept {}/{} onsets",
                        band,
                        filtered.len(),
                        onsets.len()
                    );
                    filtered
                }
                _ => onsets.clone(),
            };
            (band, filtered)
        })
        .collect()
}
