// Stream simplification
// Pools over-dense mid/high streams (shakers, claps) into texture events

use serde::{Deserialize, Serialize};

use super::types::{Stream, StreamEvent};
use crate::config::{require_non_negative, require_positive, ConfigError};
use crate::onsets::Band;

/// Strength sums at or below this are treated as "no strength information"
const STRENGTH_SUM_EPS: f64 = 1e-12;

/// Minimum events before a stream is considered for pooling
const MIN_EVENTS_TO_POOL: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Events within this span of a cluster's first event are pooled (seconds)
    pub pool_window_sec: f64,

    /// Streams at or above this density (events/sec) are pooled
    pub density_threshold: f64,

    /// Bands eligible for pooling; the low band keeps per-hit fidelity
    pub bands: Vec<Band>,

    /// IOI floor used when statistics are recomputed
    pub ioi_min_sec: f64,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        SimplifyConfig {
            pool_window_sec: 0.12,
            density_threshold: 6.0,
            bands: vec![Band::Mid, Band::High],
            ioi_min_sec: 0.05,
        }
    }
}

impl SimplifyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("pool_window_sec", self.pool_window_sec)?;
        require_non_negative("density_threshold", self.density_threshold)?;
        require_non_negative("ioi_min_sec", self.ioi_min_sec)?;
        if self.bands.contains(&Band::Low) {
            return Err(ConfigError::invalid("bands", "the low band cannot be pooled"));
        }
        Ok(())
    }
}

/// Replace a cluster with one event at its strength-weighted mean time
fn pool_cluster(cluster: &[StreamEvent]) -> StreamEvent {
    let strength_sum: f64 = cluster.iter().map(|e| e.strength).sum();
    let time = if strength_sum > STRENGTH_SUM_EPS {
        cluster.iter().map(|e| e.time * e.strength).sum::<f64>() / strength_sum
    } else {
        cluster.iter().map(|e| e.time).sum::<f64>() / cluster.len() as f64
    };
    let strength = cluster
        .iter()
        .map(|e| e.strength)
        .fold(f64::NEG_INFINITY, f64::max);

    StreamEvent { time, strength }
}

/// Greedy temporal pooling of time-ordered events
///
/// A cluster starts at the first unpooled event and absorbs every following
/// event within `window_sec` of it.
pub fn temporal_pool_events(events: &[StreamEvent], window_sec: f64) -> Vec<StreamEvent> {
    let mut pooled = Vec::new();
    let mut i = 0;

    while i < events.len() {
        let t0 = events[i].time;
        let mut j = i + 1;
        while j < events.len() && events[j].time - t0 <= window_sec {
            j += 1;
        }
        pooled.push(pool_cluster(&events[i..j]));
        i = j;
    }

    pooled
}

/// Pool one stream in place if it qualifies
/// Returns true when the event list was replaced
pub fn simplify_stream(stream: &mut Stream, config: &SimplifyConfig) -> bool {
    if !config.bands.contains(&stream.band)
        || stream.density < config.density_threshold
        || stream.events.len() < MIN_EVENTS_TO_POOL
    {
        return false;
    }

    let pooled = temporal_pool_events(&stream.events, config.pool_window_sec);
    if pooled.len() >= stream.events.len() {
        return false;
    }

    log::debug!(
        "Pooled stream {}: {} -> {} events",
        stream.id,
        stream.events.len(),
        pooled.len()
    );
    stream.events = pooled;
    stream.recompute_stats(config.ioi_min_sec);
    true
}

/// Pool every dense mid/high stream; returns how many were simplified
pub fn simplify_dense_streams(streams: &mut [Stream], config: &SimplifyConfig) -> usize {
    let simplified = streams
        .iter_mut()
        .map(|stream| simplify_stream(stream, config))
        .filter(|&changed| changed)
        .count();

    if simplified > 0 {
        log::info!("Simplified {} dense streams", simplified);
    }
    simplified
}
