// Onset data types
// Bands, per-band containers and the raw onset sequences handed in by the detector

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Frequency band an onset was detected in
/// Roughly kick / snare body / hat click
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    /// All bands in canonical order
    pub const ALL: [Band; 3] = [Band::Low, Band::Mid, Band::High];

    /// Position in canonical order (low = 0)
    pub fn index(self) -> usize {
        match self {
            Band::Low => 0,
            Band::Mid => 1,
            Band::High => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Band::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Mid => "mid",
            Band::High => "high",
        }
    }

    /// Parse a band name, accepting any case
    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Band::Low),
            "mid" => Some(Band::Mid),
            "high" => Some(Band::High),
            _ => None,
        }
    }

    /// Mid and high carry shakers/claps and get the stricter treatment
    pub fn is_mid_or_high(self) -> bool {
        matches!(self, Band::Mid | Band::High)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per band
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerBand<T> {
    pub low: T,
    pub mid: T,
    pub high: T,
}

impl<T: Copy> PerBand<T> {
    pub fn new(low: T, mid: T, high: T) -> Self {
        PerBand { low, mid, high }
    }

    pub fn splat(value: T) -> Self {
        PerBand {
            low: value,
            mid: value,
            high: value,
        }
    }

    pub fn get(&self, band: Band) -> T {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
        }
    }

    pub fn set(&mut self, band: Band, value: T) {
        match band {
            Band::Low => self.low = value,
            Band::Mid => self.mid = value,
            Band::High => self.high = value,
        }
    }

    /// Values in canonical band order
    pub fn to_array(&self) -> [T; 3] {
        [self.low, self.mid, self.high]
    }
}

impl PerBand<f64> {
    /// Band holding the largest value; ties go to the lower band
    pub fn argmax(&self) -> Band {
        let values = self.to_array();
        let mut best = 0;
        for i in 1..values.len() {
            if values[i] > values[best] {
                best = i;
            }
        }
        Band::ALL[best]
    }

    /// Gap between the largest and second-largest value
    pub fn top_two_gap(&self) -> f64 {
        let mut values = self.to_array();
        values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        values[0] - values[1]
    }

    pub fn max_value(&self) -> f64 {
        self.get(self.argmax())
    }
}

/// Small ordered set of bands
/// Serializes as a list in canonical order, e.g. `["low", "high"]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Band>", from = "Vec<Band>")]
pub struct BandSet {
    bits: u8,
}

impl BandSet {
    pub fn new() -> Self {
        BandSet { bits: 0 }
    }

    pub fn single(band: Band) -> Self {
        let mut set = BandSet::new();
        set.insert(band);
        set
    }

    pub fn insert(&mut self, band: Band) {
        self.bits |= 1 << band.index();
    }

    pub fn contains(&self, band: Band) -> bool {
        self.bits & (1 << band.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Members in canonical order
    pub fn iter(&self) -> impl Iterator<Item = Band> + '_ {
        Band::ALL.into_iter().filter(move |b| self.contains(*b))
    }

    pub fn to_vec(&self) -> Vec<Band> {
        self.iter().collect()
    }
}

impl From<BandSet> for Vec<Band> {
    fn from(set: BandSet) -> Self {
        set.to_vec()
    }
}

impl From<Vec<Band>> for BandSet {
    fn from(bands: Vec<Band>) -> Self {
        bands.into_iter().collect()
    }
}

impl FromIterator<Band> for BandSet {
    fn from_iter<I: IntoIterator<Item = Band>>(iter: I) -> Self {
        let mut set = BandSet::new();
        for band in iter {
            set.insert(band);
        }
        set
    }
}

/// A single detected onset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Onset time in seconds from track start
    pub time: f64,

    /// Onset salience, >= 0
    pub strength: f64,

    pub band: Band,
}

/// Parallel onset arrays for one band
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandOnsets {
    /// Onset times in seconds
    pub times: Vec<f64>,

    /// Onset strengths; may be empty or of a different length when the
    /// detector had no strength information
    #[serde(default)]
    pub strengths: Vec<f64>,
}

impl BandOnsets {
    pub fn new(times: Vec<f64>, strengths: Vec<f64>) -> Self {
        BandOnsets { times, strengths }
    }

    /// Onsets without strength information
    pub fn from_times(times: Vec<f64>) -> Self {
        BandOnsets {
            times,
            strengths: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Whether the strength array lines up with the time array
    pub fn has_aligned_strengths(&self) -> bool {
        self.strengths.len() == self.times.len()
    }

    /// Strengths aligned with `times`, or `fill` for every onset when the
    /// strength array is missing or mismatched
    pub fn strengths_or(&self, fill: f64) -> Vec<f64> {
        if self.has_aligned_strengths() {
            self.strengths.clone()
        } else {
            vec![fill; self.times.len()]
        }
    }

    /// Onsets as events, sorted by time
    pub fn events(&self, band: Band) -> Vec<OnsetEvent> {
        let strengths = self.strengths_or(0.0);
        let mut events: Vec<OnsetEvent> = self
            .times
            .iter()
            .zip(strengths)
            .map(|(&time, strength)| OnsetEvent {
                time,
                strength,
                band,
            })
            .collect();
        events.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
        events
    }
}

/// Onset arrays for every band of a track
pub type TrackOnsets = BTreeMap<Band, BandOnsets>;
