// Band evidence
// Which bands have an onset close to each anchor event

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::onsets::{Band, TrackOnsets};

/// A band onset found near an anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandHit {
    pub present: bool,

    #[serde(default)]
    pub onset_strength: f64,

    /// Band onset time minus anchor time, in seconds
    #[serde(default)]
    pub dt: f64,
}

/// Per-band evidence for one anchor; `None` means no onset within tolerance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEvidence {
    #[serde(default)]
    pub low: Option<BandHit>,
    #[serde(default)]
    pub mid: Option<BandHit>,
    #[serde(default)]
    pub high: Option<BandHit>,
}

impl BandEvidence {
    pub fn get(&self, band: Band) -> Option<&BandHit> {
        match band {
            Band::Low => self.low.as_ref(),
            Band::Mid => self.mid.as_ref(),
            Band::High => self.high.as_ref(),
        }
    }

    pub fn set(&mut self, band: Band, hit: Option<BandHit>) {
        match band {
            Band::Low => self.low = hit,
            Band::Mid => self.mid = hit,
            Band::High => self.high = hit,
        }
    }

    /// Whether `band` has a present hit
    pub fn is_present(&self, band: Band) -> bool {
        self.get(band).is_some_and(|hit| hit.present)
    }

    /// Strength of a present hit
    pub fn strength(&self, band: Band) -> Option<f64> {
        self.get(band)
            .filter(|hit| hit.present)
            .map(|hit| hit.onset_strength)
    }
}

/// Nearest onset to `time` within `tolerance`, as `(index, dt)`
/// Equal distances resolve to the earlier onset
fn nearest_within(times: &[f64], time: f64, tolerance: f64) -> Option<(usize, f64)> {
    times
        .iter()
        .enumerate()
        .map(|(i, &t)| (i, t - time))
        .filter(|(_, dt)| dt.abs() <= tolerance)
        .min_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap_or(Ordering::Equal))
}

/// Collect band evidence for every anchor
///
/// For each anchor and each band present in `bands`, the nearest band onset
/// within `tolerance` seconds becomes a hit carrying its strength (0 when
/// strengths are missing) and its offset from the anchor.
pub fn collect_band_evidence(
    anchor_times: &[f64],
    bands: &TrackOnsets,
    tolerance: f64,
) -> Vec<BandEvidence> {
    let strengths: Vec<(Band, Vec<f64>)> = bands
        .iter()
        .map(|(&band, onsets)| (band, onsets.strengths_or(0.0)))
        .collect();

    anchor_times
        .iter()
        .map(|&anchor| {
            let mut evidence = BandEvidence::default();
            for (band, band_strengths) in &strengths {
                let Some(onsets) = bands.get(band) else {
                    continue;
                };
                let hit = nearest_within(&onsets.times, anchor, tolerance).map(|(i, dt)| BandHit {
                    present: true,
                    onset_strength: band_strengths[i],
                    dt,
                });
                evidence.set(*band, hit);
            }
            evidence
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onsets::BandOnsets;

    #[test]
    fn test_collects_nearest_hit_per_band() {
        let mut bands = TrackOnsets::new();
        bands.insert(Band::Low, BandOnsets::new(vec![0.0, 1.0], vec![0.9, 0.8]));
        bands.insert(Band::High, BandOnsets::new(vec![0.98, 1.03, 2.0], vec![0.2, 0.4, 0.3]));

        let evidence = collect_band_evidence(&[1.0, 1.5], &bands, 0.05);

        assert_eq!(evidence.len(), 2);
        let first = &evidence[0];
        assert_eq!(first.strength(Band::Low), Some(0.8));
        // 0.98 is closer than 1.03
        let high = first.get(Band::High).unwrap();
        assert_eq!(high.onset_strength, 0.2);
        assert!((high.dt + 0.02).abs() < 1e-9);
        assert!(!first.is_present(Band::Mid));

        assert_eq!(evidence[1], BandEvidence::default());
    }

    #[test]
    fn test_missing_strengths_give_zero() {
        let mut bands = TrackOnsets::new();
        bands.insert(Band::Mid, BandOnsets::from_times(vec![0.5]));

        let evidence = collect_band_evidence(&[0.51], &bands, 0.05);

        assert!(evidence[0].is_present(Band::Mid));
        assert_eq!(evidence[0].strength(Band::Mid), Some(0.0));
    }

    #[test]
    fn test_absent_hit_not_present() {
        let evidence = BandEvidence {
            low: Some(BandHit {
                present: false,
                onset_strength: 0.7,
                dt: 0.0,
            }),
            ..BandEvidence::default()
        };
        assert!(!evidence.is_present(Band::Low));
        assert_eq!(evidence.strength(Band::Low), None);
    }

    #[test]
    fn test_deserializes_sparse_records() {
        let json = r#"{"low": {"present": true, "onset_strength": 0.6, "dt": 0.01}, "mid": null}"#;
        let evidence: BandEvidence = serde_json::from_str(json).unwrap();

        assert!(evidence.is_present(Band::Low));
        assert!(evidence.mid.is_none());
        assert!(evidence.high.is_none());
    }
}
