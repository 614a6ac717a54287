// Stream types
// A stream is one rhythmic layer: a run of same-band onsets with a consistent IOI

use serde::{Deserialize, Serialize};

use crate::onsets::{Band, OnsetEvent};
use crate::stats;

/// Perceptual layer of a stream or event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Main impact / accent
    P0,

    /// Repeating pattern / groove
    P1,

    /// Decorative nuance
    P2,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::P0 => "P0",
            Layer::P1 => "P1",
            Layer::P2 => "P2",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "P0" | "p0" => Some(Layer::P0),
            "P1" | "p1" => Some(Layer::P1),
            "P2" | "p2" => Some(Layer::P2),
            _ => None,
        }
    }
}

/// One onset inside a stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Onset time in seconds
    pub time: f64,

    pub strength: f64,
}

impl From<OnsetEvent> for StreamEvent {
    fn from(onset: OnsetEvent) -> Self {
        StreamEvent {
            time: onset.time,
            strength: onset.strength,
        }
    }
}

/// A finalized rhythm stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Stable identifier, `"{band}_{n}"`
    pub id: String,

    pub band: Band,

    /// Events in strictly increasing time order
    pub events: Vec<StreamEvent>,

    /// Time of the first event
    pub start: f64,

    /// Time of the last event
    pub end: f64,

    /// Median inter-onset interval (IOIs below the floor excluded), 0 if none
    pub median_ioi: f64,

    /// Population std of the same IOIs
    pub ioi_std: f64,

    /// Onset rate over [start, end] in events per second
    pub density: f64,

    pub strength_median: f64,

    /// Indices into `events` of hits stronger than their neighbours
    pub accents: Vec<usize>,

    #[serde(default)]
    pub layer: Option<Layer>,
}

impl Stream {
    /// Build a stream from its events and derive every statistic
    pub fn from_events(id: String, band: Band, events: Vec<StreamEvent>, ioi_min_sec: f64) -> Self {
        let mut stream = Stream {
            id,
            band,
            events,
            start: 0.0,
            end: 0.0,
            median_ioi: 0.0,
            ioi_std: 0.0,
            density: 0.0,
            strength_median: 0.0,
            accents: Vec::new(),
            layer: None,
        };
        stream.recompute_stats(ioi_min_sec);
        stream
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.time).collect()
    }

    pub fn strengths(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.strength).collect()
    }

    /// Accent times, for keypoint export
    pub fn accent_times(&self) -> Vec<f64> {
        self.accents
            .iter()
            .filter_map(|&i| self.events.get(i).map(|e| e.time))
            .collect()
    }

    /// IOI stability `std / median`, 1.0 when the median is too small to divide by
    pub fn ioi_stability(&self) -> f64 {
        if self.median_ioi > 0.001 {
            self.ioi_std / self.median_ioi
        } else {
            1.0
        }
    }

    /// Number of events within `[from, to]` (inclusive)
    pub fn events_in(&self, from: f64, to: f64) -> usize {
        self.events
            .iter()
            .filter(|e| e.time >= from && e.time <= to)
            .count()
    }

    /// Whether the stream's span touches `[from, to]`
    pub fn touches(&self, from: f64, to: f64) -> bool {
        !(self.end < from || self.start > to)
    }

    /// Re-derive span, IOI statistics, density, median strength and accents
    /// from the current event list
    pub fn recompute_stats(&mut self, ioi_min_sec: f64) {
        let times = self.times();
        let strengths = self.strengths();

        self.start = times.first().copied().unwrap_or(0.0);
        self.end = times.last().copied().unwrap_or(0.0);

        let iois: Vec<f64> = stats::diffs(&times)
            .into_iter()
            .filter(|&dt| dt >= ioi_min_sec)
            .collect();
        self.median_ioi = stats::median_or(&iois, 0.0);
        self.ioi_std = if iois.len() > 1 {
            stats::std_dev(&iois)
        } else {
            0.0
        };

        let span = self.end - self.start;
        self.density = if times.len() >= 2 && span > 0.0 {
            (times.len() - 1) as f64 / span
        } else {
            0.0
        };

        self.strength_median = stats::median_or(&strengths, 0.0);
        self.accents = find_accents(&strengths, self.strength_median);
    }
}

/// Indices whose strength beats every existing neighbour and the median
pub fn find_accents(strengths: &[f64], strength_median: f64) -> Vec<usize> {
    let n = strengths.len();
    (0..n)
        .filter(|&i| {
            let s = strengths[i];
            let beats_prev = i == 0 || s > strengths[i - 1];
            let beats_next = i + 1 >= n || s > strengths[i + 1];
            n >= 2 && beats_prev && beats_next && s > strength_median
        })
        .collect()
}
