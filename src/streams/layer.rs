// Per-stream layer classification (P0 / P1 / P2) against track-wide medians

use std::collections::BTreeMap;

use super::types::{Layer, Stream};
use crate::onsets::Band;
use crate::stats;

/// Track-wide reference values the per-stream rule compares against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMedians {
    pub density: f64,
    pub strength: f64,
    pub stability: f64,
    pub duration: f64,
}

impl TrackMedians {
    pub fn from_streams(streams: &[Stream]) -> Self {
        let collect = |f: fn(&Stream) -> f64| -> f64 {
            let values: Vec<f64> = streams.iter().map(f).collect();
            stats::median_or(&values, 0.0)
        };

        TrackMedians {
            density: collect(|s| s.density),
            strength: collect(|s| s.strength_median),
            stability: collect(|s| s.ioi_stability()),
            duration: collect(|s| s.duration()),
        }
    }
}

/// Classify one stream
///
/// - P0: low/mid band, not denser than 1.2x the median, stronger than 0.8x the median
/// - P1: long (> 0.8x median duration), dense (> 0.7x median) and stable (< 1.5x median)
/// - P2: everything else
pub fn stream_layer(stream: &Stream, medians: &TrackMedians) -> Layer {
    let is_impact_band = matches!(stream.band, Band::Low | Band::Mid);
    if is_impact_band
        && stream.density < 1.2 * medians.density
        && stream.strength_median > 0.8 * medians.strength
    {
        return Layer::P0;
    }

    if stream.duration() > 0.8 * medians.duration
        && stream.density > 0.7 * medians.density
        && stream.ioi_stability() < 1.5 * medians.stability
    {
        return Layer::P1;
    }

    Layer::P2
}

/// Label every stream, keyed by stream id
pub fn assign_stream_layers(streams: &[Stream]) -> BTreeMap<String, Layer> {
    if streams.is_empty() {
        return BTreeMap::new();
    }

    let medians = TrackMedians::from_streams(streams);
    log::debug!(
        "Layer medians: density {:.3}, strength {:.3}, stability {:.3}, duration {:.3}",
        medians.density,
        medians.strength,
        medians.stability,
        medians.duration
    );

    streams
        .iter()
        .map(|s| (s.id.clone(), stream_layer(s, &medians)))
        .collect()
}

/// Write labels back into the streams; unlabelled streams become P2
pub fn apply_stream_layers(streams: &mut [Stream], layers: &BTreeMap<String, Layer>) {
    for stream in streams.iter_mut() {
        stream.layer = Some(layers.get(&stream.id).copied().unwrap_or(Layer::P2));
    }
}
