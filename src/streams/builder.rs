// Stream builder
// Online grouping of one band's onsets into IOI-consistent rhythm streams.
// Each onset goes to the active stream whose running median IOI predicts it
// best; silence and repeated misses close streams.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

use super::types::{Stream, StreamEvent};
use crate::config::{require_non_negative, require_positive, ConfigError};
use crate::onsets::{Band, BandOnsets, TrackOnsets};
use crate::stats;

/// Configuration for stream tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Onsets closer than this to the previously kept onset are dropped (seconds)
    pub min_separation_sec: f64,

    /// Onsets weaker than this are dropped before tracking (0 disables)
    pub strength_floor: f64,

    /// IOIs shorter than this are treated as doubled detections and
    /// kept out of the running median (seconds)
    pub ioi_min_sec: f64,

    /// A stream silent for longer than `gap_break_factor * median_ioi` is closed
    pub gap_break_factor: f64,

    /// Relative IOI deviation accepted as a strict fit
    /// Up to twice this counts as a soft fit
    pub ioi_tolerance_ratio: f64,

    /// Streams need at least this many events...
    pub min_events_per_stream: usize,

    /// ...or at least this span in seconds to survive finalization
    pub min_stream_duration: f64,

    /// Consecutive misses after which an active stream is closed
    pub consecutive_misses_for_break: usize,

    /// Number of recent IOIs feeding the running median
    pub running_ioi_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            min_separation_sec: 0.03,
            strength_floor: 0.0,
            ioi_min_sec: 0.05,
            gap_break_factor: 3.0,
            ioi_tolerance_ratio: 0.25,
            min_events_per_stream: 4,
            min_stream_duration: 2.0,
            consecutive_misses_for_break: 4,
            running_ioi_window: 8,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("min_separation_sec", self.min_separation_sec)?;
        require_non_negative("ioi_min_sec", self.ioi_min_sec)?;
        require_positive("gap_break_factor", self.gap_break_factor)?;
        require_positive("ioi_tolerance_ratio", self.ioi_tolerance_ratio)?;
        require_non_negative("min_stream_duration", self.min_stream_duration)?;
        if self.consecutive_misses_for_break == 0 {
            return Err(ConfigError::invalid("consecutive_misses_for_break", "must be >= 1"));
        }
        if self.running_ioi_window == 0 {
            return Err(ConfigError::invalid("running_ioi_window", "must be >= 1"));
        }
        Ok(())
    }
}

/// Outcome of testing one onset against one active stream
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fit {
    /// Within tolerance; score is the relative IOI deviation
    Strict(f64),

    /// Within twice the tolerance; a fallback that still counts as a miss
    Soft(f64),

    /// Outside both tolerances but not gap-broken
    Miss,

    /// Not a candidate at all (gap exceeded or non-increasing time)
    Reject,
}

/// Running state of a stream under construction
struct ActiveStream {
    events: Vec<StreamEvent>,
    last_time: f64,
    iois: VecDeque<f64>,
    median_ioi: Option<f64>,
    misses: usize,
}

impl ActiveStream {
    fn open(event: StreamEvent, window: usize) -> Self {
        ActiveStream {
            events: vec![event],
            last_time: event.time,
            iois: VecDeque::with_capacity(window),
            median_ioi: None,
            misses: 0,
        }
    }

    fn is_gap_broken(&self, time: f64, config: &StreamConfig) -> bool {
        match self.median_ioi {
            Some(m) => time - self.last_time > config.gap_break_factor * m,
            None => false,
        }
    }

    fn fit(&self, time: f64, config: &StreamConfig) -> Fit {
        let dt = time - self.last_time;
        if dt <= 0.0 {
            return Fit::Reject;
        }

        let m = match self.median_ioi {
            Some(m) if m > 0.0 => m,
            // Bootstrap: no established IOI yet
            _ => return Fit::Strict(0.0),
        };

        if dt > config.gap_break_factor * m {
            return Fit::Reject;
        }

        let deviation = (dt - m).abs();
        if deviation <= config.ioi_tolerance_ratio * m {
            Fit::Strict(deviation / m)
        } else if deviation <= 2.0 * config.ioi_tolerance_ratio * m {
            Fit::Soft(deviation / m)
        } else {
            Fit::Miss
        }
    }

    fn append(&mut self, event: StreamEvent, config: &StreamConfig) {
        let dt = event.time - self.last_time;
        self.events.push(event);
        self.last_time = event.time;

        if dt >= config.ioi_min_sec {
            if self.iois.len() == config.running_ioi_window {
                self.iois.pop_front();
            }
            self.iois.push_back(dt);
        }
        let history: Vec<f64> = self.iois.iter().copied().collect();
        self.median_ioi = stats::median(&history);
        self.misses = 0;
    }

    fn span(&self) -> f64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

/// Move every active stream matching `predicate` to `finished`, keeping order
fn close_where<F>(active: &mut Vec<ActiveStream>, finished: &mut Vec<ActiveStream>, predicate: F)
where
    F: Fn(&ActiveStream) -> bool,
{
    let (closed, kept): (Vec<ActiveStream>, Vec<ActiveStream>) =
        std::mem::take(active).into_iter().partition(|s| predicate(s));
    finished.extend(closed);
    *active = kept;
}

/// Group a time-ordered event sequence into raw (unfiltered) streams
fn track_events(events: &[StreamEvent], config: &StreamConfig) -> Vec<ActiveStream> {
    let mut active: Vec<ActiveStream> = Vec::new();
    let mut finished: Vec<ActiveStream> = Vec::new();

    for &event in events {
        let t = event.time;

        // 1. Hard silence break
        close_where(&mut active, &mut finished, |s| s.is_gap_broken(t, config));

        // 2. Fit test against every remaining stream
        let mut best_strict: Option<(usize, f64)> = None;
        let mut best_soft: Option<(usize, f64)> = None;
        for (idx, stream) in active.iter_mut().enumerate() {
            match stream.fit(t, config) {
                Fit::Strict(score) => {
                    if best_strict.map_or(true, |(_, best)| score < best) {
                        best_strict = Some((idx, score));
                    }
                }
                Fit::Soft(score) => {
                    stream.misses += 1;
                    if best_soft.map_or(true, |(_, best)| score < best) {
                        best_soft = Some((idx, score));
                    }
                }
                Fit::Miss => stream.misses += 1,
                Fit::Reject => {}
            }
        }

        // 3-4. Strict fit first, soft fit to limit fragmentation, else a new stream
        match best_strict.or(best_soft) {
            Some((idx, _)) => active[idx].append(event, config),
            None => active.push(ActiveStream::open(event, config.running_ioi_window)),
        }

        // 5. Repeated misses end a stream
        close_where(&mut active, &mut finished, |s| {
            s.misses >= config.consecutive_misses_for_break
        });
    }

    // 6. Close whatever is left
    finished.extend(active);
    finished
}

/// Sort onsets and drop those closer than `min_separation` to the previously
/// kept onset or weaker than `strength_floor` (a floor <= 0 keeps all)
///
/// An onset that fails the floor never becomes the reference for the next
/// separation check. Mismatched strengths count as zeros.
fn dedupe_keep_first(onsets: &BandOnsets, min_separation: f64, strength_floor: f64) -> BandOnsets {
    let strengths = onsets.strengths_or(0.0);
    let mut order: Vec<usize> = (0..onsets.times.len()).collect();
    order.sort_by(|&a, &b| {
        onsets.times[a]
            .partial_cmp(&onsets.times[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = BandOnsets::default();
    let mut last_kept: Option<f64> = None;
    for i in order {
        let (time, strength) = (onsets.times[i], strengths[i]);
        if last_kept.is_some_and(|last| time - last < min_separation) {
            continue;
        }
        if strength_floor > 0.0 && strength < strength_floor {
            continue;
        }
        kept.times.push(time);
        kept.strengths.push(strength);
        last_kept = Some(time);
    }
    kept
}

/// Build streams for one band
///
/// Onsets are sorted, then de-duplicated against the previously kept onset
/// and strength-filtered before tracking. A finished stream survives when it
/// has at least `min_events_per_stream` events or spans at least
/// `min_stream_duration` seconds. Ids are `"{band}_{n}"` in closing order.
pub fn build_band_streams(band: Band, onsets: &BandOnsets, config: &StreamConfig) -> Vec<Stream> {
    if onsets.is_empty() {
        return Vec::new();
    }

    let refined = dedupe_keep_first(onsets, config.min_separation_sec, config.strength_floor);

    let events: Vec<StreamEvent> = refined.events(band).into_iter().map(StreamEvent::from).collect();

    let raw = track_events(&events, config);
    let raw_count = raw.len();

    let mut streams = Vec::new();
    for active in raw {
        if active.events.len() < config.min_events_per_stream
            && active.span() < config.min_stream_duration
        {
            continue;
        }
        let id = format!("{}_{}", band, streams.len());
        streams.push(Stream::from_events(id, band, active.events, config.ioi_min_sec));
    }

    log::debug!(
        "{} band: {} onsets -> {} candidate streams -> {} kept",
        band,
        events.len(),
        raw_count,
        streams.len()
    );
    streams
}

/// Build streams for every band present, in low/mid/high order
pub fn build_streams(track: &TrackOnsets, config: &StreamConfig) -> Vec<Stream> {
    let mut streams = Vec::new();
    for band in Band::ALL {
        if let Some(onsets) = track.get(&band) {
            streams.extend(build_band_streams(band, onsets, config));
        }
    }
    log::info!("Built {} streams", streams.len());
    streams
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular(start: f64, end: f64, step: f64) -> Vec<f64> {
        let count = ((end - start) / step).round() as usize;
        (0..=count).map(|i| start + i as f64 * step).collect()
    }

    fn with_ones(times: Vec<f64>) -> BandOnsets {
        let strengths = vec![1.0; times.len()];
        BandOnsets::new(times, strengths)
    }

    fn assert_monotonic(stream: &Stream) {
        for w in stream.events.windows(2) {
            assert!(w[1].time > w[0].time);
        }
        assert_eq!(stream.start, stream.events[0].time);
        assert_eq!(stream.end, stream.events[stream.events.len() - 1].time);
    }

    #[test]
    fn test_regular_kick_forms_one_stream() {
        let onsets = with_ones(vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        let streams = build_band_streams(Band::Low, &onsets, &StreamConfig::default());

        assert_eq!(streams.len(), 1);
        let stream = &streams[0];
        assert_eq!(stream.id, "low_0");
        assert_eq!(stream.band, Band::Low);
        assert_eq!(stream.events.len(), 5);
        assert!((stream.median_ioi - 0.5).abs() < 1e-9);
        assert!((stream.density - 2.0).abs() < 1e-9);
        assert_monotonic(stream);
    }

    #[test]
    fn test_empty_band_yields_no_streams() {
        let streams = build_band_streams(Band::High, &BandOnsets::default(), &StreamConfig::default());
        assert!(streams.is_empty());
    }

    #[test]
    fn test_silence_splits_streams() {
        let mut times = regular(0.0, 4.0, 0.5);
        times.extend(regular(10.0, 14.0, 0.5));

        let streams = build_band_streams(Band::Low, &with_ones(times), &StreamConfig::default());

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].id, "low_0");
        assert_eq!(streams[0].end, 4.0);
        assert_eq!(streams[1].id, "low_1");
        assert_eq!(streams[1].start, 10.0);
        for stream in &streams {
            assert_eq!(stream.events.len(), 9);
            assert_monotonic(stream);
        }
    }

    #[test]
    fn test_soft_fit_keeps_stream_together() {
        // 0.65 deviates 30% from the 0.5 median: outside strict, inside soft tolerance
        let times = vec![0.0, 0.5, 1.0, 1.5, 2.15, 2.65, 3.15];
        let streams = build_band_streams(Band::Mid, &with_ones(times), &StreamConfig::default());

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].events.len(), 7);
    }

    #[test]
    fn test_consecutive_misses_close_stream() {
        let config = StreamConfig {
            consecutive_misses_for_break: 1,
            min_events_per_stream: 2,
            ..StreamConfig::default()
        };
        let times = vec![0.0, 0.5, 1.0, 1.5, 1.6, 2.0, 2.4];

        let streams = build_band_streams(Band::Low, &with_ones(times), &config);

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].times(), vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(streams[1].times(), vec![1.6, 2.0, 2.4]);
    }

    #[test]
    fn test_short_sparse_streams_dropped() {
        // Three hits spanning one second: below both survival thresholds
        let streams = build_band_streams(
            Band::High,
            &with_ones(vec![5.0, 5.5, 6.0]),
            &StreamConfig::default(),
        );
        assert!(streams.is_empty());
    }

    #[test]
    fn test_long_span_survives_with_few_events() {
        // Two hits three seconds apart: few events but a long span
        let streams = build_band_streams(
            Band::Low,
            &with_ones(vec![1.0, 4.0]),
            &StreamConfig::default(),
        );
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].events.len(), 2);
    }

    #[test]
    fn test_duplicates_within_min_separation_removed() {
        let times = vec![0.0, 0.01, 0.5, 0.51, 1.0, 1.5, 2.0];
        let streams = build_band_streams(Band::Low, &with_ones(times), &StreamConfig::default());

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].times(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_separation_measured_from_last_kept_onset() {
        let times = vec![0.0, 0.02, 0.04, 0.54, 1.04, 1.54, 2.04];
        let streams = build_band_streams(Band::Low, &with_ones(times), &StreamConfig::default());

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].times(), vec![0.0, 0.04, 0.54, 1.04, 1.54, 2.04]);
    }

    #[test]
    fn test_dedupe_skips_weak_onsets_as_reference() {
        let onsets = BandOnsets::new(vec![0.1, 0.0, 0.02, 0.04], vec![1.0, 0.2, 1.0, 1.0]);
        let kept = dedupe_keep_first(&onsets, 0.03, 0.5);

        assert_eq!(kept.times, vec![0.02, 0.1]);
        assert_eq!(kept.strengths, vec![1.0, 1.0]);
    }

    #[test]
    fn test_dedupe_without_strengths_and_floor() {
        let onsets = BandOnsets::from_times(vec![0.0, 0.5, 1.0]);

        assert_eq!(dedupe_keep_first(&onsets, 0.03, 0.0).times, vec![0.0, 0.5, 1.0]);
        assert!(dedupe_keep_first(&onsets, 0.03, 0.5).is_empty());
    }

    #[test]
    fn test_soft_fit_resets_misses_before_break_check() {
        let config = StreamConfig {
            consecutive_misses_for_break: 1,
            ..StreamConfig::default()
        };
        let times = vec![0.0, 0.5, 1.0, 1.5, 2.15, 2.65, 3.15];
        let streams = build_band_streams(Band::Mid, &with_ones(times.clone()), &config);

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].times(), times);
    }

    #[test]
    fn test_build_streams_orders_bands() {
        let mut track = TrackOnsets::new();
        track.insert(Band::High, with_ones(regular(0.0, 4.0, 0.25)));
        track.insert(Band::Low, with_ones(regular(0.0, 4.0, 0.5)));
        track.insert(Band::Mid, BandOnsets::default());

        let streams = build_streams(&track, &StreamConfig::default());

        let ids: Vec<&str> = streams.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["low_0", "high_0"]);
    }

    #[test]
    fn test_missing_strengths_become_zero() {
        let onsets = BandOnsets::from_times(vec![0.0, 0.5, 1.0, 1.5]);
        let streams = build_band_streams(Band::Low, &onsets, &StreamConfig::default());

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].strength_median, 0.0);
    }
}
