// Role composition
// Per-anchor, per-band P0/P1/P2 labels from normalized band energies
//
// Two strategies share the P2 rule:
// - RepetitionGroups: P0 is a group-relative energy quantile, P1 is group membership
// - Legacy: P0 is the energy argmax, P1 comes from temporal repetition scores

use serde::{Deserialize, Serialize};

use super::evidence::BandEvidence;
use super::repetition::{group_members, repetition_groups};
use crate::config::{require_non_negative, require_positive, require_unit, ConfigError};
use crate::onsets::{Band, BandSet, PerBand};
use crate::stats;
use crate::streams::Layer;

/// Cap on the IOI-similarity exponent
const MAX_SIMILARITY_EXPONENT: f64 = 10.0;

/// Thresholds for role composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Use repetition groups when anchor times are available
    pub use_repetition_group: bool,

    /// Group-relative energy quantile a band must reach to be P0
    pub p0_quantile: f64,

    /// IOI tolerance for repetition groups, relative to the median IOI
    pub ioi_rel_tol: f64,

    /// Events whose top two band energies are closer than this are broadband
    pub eps_broadband: f64,

    /// Legacy P1 threshold on the repetition score
    pub tau_repeat: f64,

    /// Minimum dependency score for P2 to be considered
    pub dep_th: f64,

    /// P2 energy must exceed this...
    pub p2_abs_floor: f64,

    /// ...and stay below this fraction of the top band energy
    pub p2_ratio_to_p0: f64,

    /// Legacy IOI-similarity scale in seconds
    pub ioi_sigma_sec: f64,

    /// Window for matching band onsets to anchors
    pub evidence_tolerance_sec: f64,
}

impl Default for RoleConfig {
    fn default() -> Self {
        RoleConfig {
            use_repetition_group: true,
            p0_quantile: 0.80,
            ioi_rel_tol: 0.20,
            eps_broadband: 0.08,
            tau_repeat: 0.35,
            dep_th: 0.5,
            p2_abs_floor: 0.10,
            p2_ratio_to_p0: 0.6,
            ioi_sigma_sec: 0.05,
            evidence_tolerance_sec: 0.05,
        }
    }
}

impl RoleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_unit("p0_quantile", self.p0_quantile)?;
        require_non_negative("ioi_rel_tol", self.ioi_rel_tol)?;
        require_non_negative("eps_broadband", self.eps_broadband)?;
        require_non_negative("tau_repeat", self.tau_repeat)?;
        require_non_negative("dep_th", self.dep_th)?;
        require_non_negative("p2_abs_floor", self.p2_abs_floor)?;
        require_positive("p2_ratio_to_p0", self.p2_ratio_to_p0)?;
        require_positive("ioi_sigma_sec", self.ioi_sigma_sec)?;
        require_non_negative("evidence_tolerance_sec", self.evidence_tolerance_sec)?;
        Ok(())
    }
}

/// Band roles of one anchor event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleComposition {
    #[serde(rename = "P0")]
    pub p0: BandSet,

    #[serde(rename = "P0_primary")]
    pub p0_primary: Band,

    #[serde(rename = "P1")]
    pub p1: BandSet,

    #[serde(rename = "P2")]
    pub p2: BandSet,
}

impl RoleComposition {
    /// Single event label: P2 if any band is decorative, else P1 if any band
    /// repeats, else P0
    pub fn dominant_layer(&self) -> Layer {
        if !self.p2.is_empty() {
            Layer::P2
        } else if !self.p1.is_empty() {
            Layer::P1
        } else {
            Layer::P0
        }
    }
}

/// Per-anchor signals consumed by role composition
/// Only `energies` is required; its length defines the anchor count.
#[derive(Debug, Clone, Copy)]
pub struct RoleInputs<'a> {
    pub energies: &'a [PerBand<f64>],
    pub onset_times: Option<&'a [f64]>,
    pub band_evidence: Option<&'a [BandEvidence]>,
    pub temporal: Option<&'a [f64]>,
    pub dependency: Option<&'a [f64]>,
}

impl<'a> RoleInputs<'a> {
    pub fn new(energies: &'a [PerBand<f64>]) -> Self {
        RoleInputs {
            energies,
            onset_times: None,
            band_evidence: None,
            temporal: None,
            dependency: None,
        }
    }

    pub fn with_onset_times(mut self, times: &'a [f64]) -> Self {
        self.onset_times = Some(times);
        self
    }

    pub fn with_band_evidence(mut self, evidence: &'a [BandEvidence]) -> Self {
        self.band_evidence = Some(evidence);
        self
    }

    pub fn with_temporal(mut self, temporal: &'a [f64]) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_dependency(mut self, dependency: &'a [f64]) -> Self {
        self.dependency = Some(dependency);
        self
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    fn temporal_at(&self, i: usize) -> f64 {
        self.temporal.and_then(|t| t.get(i).copied()).unwrap_or(0.0)
    }

    fn dependency_at(&self, i: usize) -> Option<f64> {
        self.dependency.and_then(|d| d.get(i).copied())
    }

    fn evidence_at(&self, i: usize) -> Option<&'a BandEvidence> {
        self.band_evidence.and_then(|e| e.get(i))
    }

    /// IOI ending at anchor `i`; none for the first anchor or missing times
    fn ioi_at(&self, i: usize) -> Option<f64> {
        let times = self.onset_times?;
        if i == 0 || i >= times.len() {
            return None;
        }
        Some(times[i] - times[i - 1])
    }
}

/// Which role-composition rule set runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStrategy {
    RepetitionGroups,
    Legacy,
}

impl RoleStrategy {
    /// Repetition groups need anchor times and at least two anchors
    pub fn select(inputs: &RoleInputs<'_>, config: &RoleConfig) -> Self {
        if config.use_repetition_group && inputs.onset_times.is_some() && inputs.len() >= 2 {
            RoleStrategy::RepetitionGroups
        } else {
            RoleStrategy::Legacy
        }
    }
}

/// Decorative bands of one anchor
///
/// Requires a clear top band (gap to the second >= `eps_broadband`) and a
/// dependency score >= `dep_th`. A band outside `exclude` qualifies when its
/// energy lies strictly between `p2_abs_floor` and `p2_ratio_to_p0` times the
/// top energy.
fn p2_bands(
    energy: &PerBand<f64>,
    exclude: BandSet,
    dependency: Option<f64>,
    config: &RoleConfig,
) -> BandSet {
    let broadband = energy.top_two_gap() < config.eps_broadband;
    let gated = dependency.is_some_and(|d| d >= config.dep_th);
    if broadband || !gated {
        return BandSet::new();
    }

    let upper = energy.max_value() * config.p2_ratio_to_p0;
    Band::ALL
        .into_iter()
        .filter(|&band| !exclude.contains(band))
        .filter(|&band| {
            let e = energy.get(band);
            config.p2_abs_floor < e && e < upper
        })
        .collect()
}

/// Group index for every anchor; anchors beyond the supplied times get their
/// own singleton groups
fn anchor_groups(inputs: &RoleInputs<'_>, rel_tol: f64) -> Vec<usize> {
    let n = inputs.len();
    let times = inputs.onset_times.unwrap_or(&[]);
    let usable = &times[..times.len().min(n)];
    if usable.len() < n {
        log::warn!(
            "{} onset times for {} anchors; unmatched anchors form their own groups",
            times.len(),
            n
        );
    }

    let mut groups = repetition_groups(usable, rel_tol);
    let mut next = groups.iter().max().map_or(0, |g| g + 1);
    while groups.len() < n {
        groups.push(next);
        next += 1;
    }
    groups
}

/// Repetition-group strategy
pub fn assign_roles_repetition(inputs: &RoleInputs<'_>, config: &RoleConfig) -> Vec<RoleComposition> {
    let groups = anchor_groups(inputs, config.ioi_rel_tol);
    let members_by_group = group_members(&groups);
    let energies = inputs.energies;

    (0..inputs.len())
        .map(|i| {
            let members: &[usize] = members_by_group
                .get(&groups[i])
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let group_size = members.len();
            let energy = &energies[i];

            // P1: recurring bands
            let p1: BandSet = if group_size < 2 {
                BandSet::new()
            } else {
                match inputs.evidence_at(i) {
                    Some(evidence) => Band::ALL
                        .into_iter()
                        .filter(|&band| evidence.is_present(band))
                        .collect(),
                    None => Band::ALL.into_iter().collect(),
                }
            };

            // P0: accents relative to the group
            let mut p0 = BandSet::new();
            for band in Band::ALL {
                let values: Vec<f64> = members.iter().map(|&j| energies[j].get(band)).collect();
                let is_accent = if values.len() < 2 {
                    values.first().is_some_and(|&v| v >= 0.0)
                } else {
                    stats::percentile(&values, config.p0_quantile)
                        .is_some_and(|threshold| energy.get(band) >= threshold)
                };
                if is_accent {
                    p0.insert(band);
                }
            }

            let p0_primary = p0
                .iter()
                .reduce(|best, band| if energy.get(band) > energy.get(best) { band } else { best })
                .unwrap_or_else(|| energy.argmax());
            if p0.is_empty() {
                p0.insert(p0_primary);
            }

            let p2 = p2_bands(energy, p0, inputs.dependency_at(i), config);

            RoleComposition {
                p0,
                p0_primary,
                p1,
                p2,
            }
        })
        .collect()
}

/// Similarity of two IOIs, `exp(-|a - b| / sigma)` with a capped exponent
fn ioi_similarity(a: Option<f64>, b: Option<f64>, sigma_sec: f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() && sigma_sec > 0.0 => {
            (-((a - b).abs() / sigma_sec).min(MAX_SIMILARITY_EXPONENT)).exp()
        }
        _ => 0.0,
    }
}

/// Legacy P1 from band evidence: a band repeats when its strength and IOI
/// match the previous anchor where the same band was present
fn legacy_p1_from_evidence(
    inputs: &RoleInputs<'_>,
    evidence: &[BandEvidence],
    config: &RoleConfig,
) -> Vec<BandSet> {
    let n = inputs.len();

    let present: Vec<f64> = evidence[..n]
        .iter()
        .flat_map(|ev| Band::ALL.into_iter().filter_map(|band| ev.strength(band)))
        .collect();
    let str_min = present.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let mut str_max = present.iter().copied().reduce(f64::max).unwrap_or(1.0);
    if str_max <= str_min {
        str_max = str_min + 1.0;
    }
    let normalize = |s: f64| (s - str_min) / (str_max - str_min);

    let mut last_seen: PerBand<Option<usize>> = PerBand::splat(None);
    (0..n)
        .map(|i| {
            let temporal = inputs.temporal_at(i);
            let mut p1 = BandSet::new();
            for band in Band::ALL {
                let Some(strength) = evidence[i].strength(band) else {
                    continue;
                };

                let previous = last_seen
                    .get(band)
                    .and_then(|prev| evidence[prev].strength(band).map(|s| (prev, s)));
                let score = match previous {
                    Some((prev, prev_strength)) => {
                        let sim_strength =
                            1.0 - (normalize(strength) - normalize(prev_strength)).abs().min(1.0);
                        let sim_ioi =
                            ioi_similarity(inputs.ioi_at(i), inputs.ioi_at(prev), config.ioi_sigma_sec);
                        temporal * sim_strength * sim_ioi
                    }
                    None => temporal * 0.5,
                };

                if score > config.tau_repeat {
                    p1.insert(band);
                }
                last_seen.set(band, Some(i));
            }
            p1
        })
        .collect()
}

/// Legacy P1 from energy continuity between consecutive anchors
fn legacy_p1_from_energy(inputs: &RoleInputs<'_>, config: &RoleConfig) -> Vec<BandSet> {
    let energies = inputs.energies;
    (0..inputs.len())
        .map(|i| {
            if i == 0 {
                return BandSet::new();
            }
            let temporal = inputs.temporal_at(i);
            Band::ALL
                .into_iter()
                .filter(|&band| {
                    let change = (energies[i].get(band) - energies[i - 1].get(band)).abs();
                    temporal * (1.0 - change.min(1.0)) > config.tau_repeat
                })
                .collect()
        })
        .collect()
}

/// Legacy strategy: argmax P0, temporal-score P1
pub fn assign_roles_legacy(inputs: &RoleInputs<'_>, config: &RoleConfig) -> Vec<RoleComposition> {
    let n = inputs.len();

    let p1_sets = match (inputs.temporal, inputs.band_evidence, inputs.onset_times) {
        (Some(_), Some(evidence), Some(_)) if n >= 2 && evidence.len() >= n => {
            legacy_p1_from_evidence(inputs, evidence, config)
        }
        (Some(_), _, _) if n >= 2 => legacy_p1_from_energy(inputs, config),
        _ => vec![BandSet::new(); n],
    };

    inputs
        .energies
        .iter()
        .zip(p1_sets)
        .enumerate()
        .map(|(i, (energy, p1))| {
            let primary = energy.argmax();
            let p0 = BandSet::single(primary);
            RoleComposition {
                p0,
                p0_primary: primary,
                p1,
                p2: p2_bands(energy, p0, inputs.dependency_at(i), config),
            }
        })
        .collect()
}

/// Compose roles for every anchor with the strategy the inputs allow
pub fn assign_roles_by_band(inputs: &RoleInputs<'_>, config: &RoleConfig) -> Vec<RoleComposition> {
    let strategy = RoleStrategy::select(inputs, config);
    log::debug!("Composing roles for {} anchors with {:?}", inputs.len(), strategy);

    match strategy {
        RoleStrategy::RepetitionGroups => assign_roles_repetition(inputs, config),
        RoleStrategy::Legacy => assign_roles_legacy(inputs, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::BandHit;

    fn bands(list: &[Band]) -> BandSet {
        list.iter().copied().collect()
    }

    fn hit(strength: f64) -> Option<BandHit> {
        Some(BandHit {
            present: true,
            onset_strength: strength,
            dt: 0.0,
        })
    }

    fn accent_energies() -> Vec<PerBand<f64>> {
        vec![
            PerBand::new(0.9, 0.2, 0.1),
            PerBand::new(0.4, 0.3, 0.1),
            PerBand::new(0.5, 0.2, 0.1),
            PerBand::new(0.4, 0.8, 0.1),
        ]
    }

    #[test]
    fn test_single_anchor_low_dominant() {
        let energies = [PerBand::new(0.9, 0.1, 0.05)];
        let inputs = RoleInputs::new(&energies).with_onset_times(&[0.0]);

        let roles = assign_roles_by_band(&inputs, &RoleConfig::default());

        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].p0, bands(&[Band::Low]));
        assert_eq!(roles[0].p0_primary, Band::Low);
        assert!(roles[0].p1.is_empty());
        assert!(roles[0].p2.is_empty());
        assert_eq!(roles[0].dominant_layer(), Layer::P0);
    }

    #[test]
    fn test_strategy_selection() {
        let energies = accent_energies();
        let times = [0.0, 0.5, 1.0, 1.5];
        let config = RoleConfig::default();

        let with_times = RoleInputs::new(&energies).with_onset_times(&times);
        assert_eq!(RoleStrategy::select(&with_times, &config), RoleStrategy::RepetitionGroups);

        let without_times = RoleInputs::new(&energies);
        assert_eq!(RoleStrategy::select(&without_times, &config), RoleStrategy::Legacy);

        let disabled = RoleConfig {
            use_repetition_group: false,
            ..RoleConfig::default()
        };
        assert_eq!(RoleStrategy::select(&with_times, &disabled), RoleStrategy::Legacy);
    }

    #[test]
    fn test_repetition_group_accents() {
        let energies = accent_energies();
        let times = [0.0, 0.5, 1.0, 1.5];
        let dependency = [1.0; 4];
        let inputs = RoleInputs::new(&energies)
            .with_onset_times(&times)
            .with_dependency(&dependency);

        let roles = assign_roles_repetition(&inputs, &RoleConfig::default());

        // One group of four; 80th percentiles: low 0.66, mid 0.5, high 0.1
        assert_eq!(roles[0].p0, bands(&[Band::Low, Band::High]));
        assert_eq!(roles[0].p0_primary, Band::Low);
        assert_eq!(roles[0].p2, bands(&[Band::Mid]));
        assert_eq!(roles[0].dominant_layer(), Layer::P2);

        assert_eq!(roles[1].p0, bands(&[Band::High]));
        assert_eq!(roles[1].p0_primary, Band::High);
        assert!(roles[1].p2.is_empty());

        assert_eq!(roles[3].p0, bands(&[Band::Mid, Band::High]));
        assert_eq!(roles[3].p0_primary, Band::Mid);

        // No evidence: every band recurs in a group of four
        for role in &roles {
            assert_eq!(role.p1, bands(&Band::ALL));
        }
    }

    #[test]
    fn test_repetition_p1_follows_evidence() {
        let energies = accent_energies();
        let times = [0.0, 0.5, 1.0, 1.5];
        let evidence = vec![
            BandEvidence { low: hit(0.9), ..BandEvidence::default() },
            BandEvidence { low: hit(0.5), high: hit(0.2), ..BandEvidence::default() },
            BandEvidence::default(),
            BandEvidence { mid: hit(0.7), ..BandEvidence::default() },
        ];
        let inputs = RoleInputs::new(&energies)
            .with_onset_times(&times)
            .with_band_evidence(&evidence);

        let roles = assign_roles_repetition(&inputs, &RoleConfig::default());

        assert_eq!(roles[0].p1, bands(&[Band::Low]));
        assert_eq!(roles[1].p1, bands(&[Band::Low, Band::High]));
        assert!(roles[2].p1.is_empty());
        assert_eq!(roles[3].p1, bands(&[Band::Mid]));
    }

    #[test]
    fn test_singleton_group_marks_every_band_p0() {
        let energies = vec![
            PerBand::new(0.2, 0.7, 0.3),
            PerBand::new(0.5, 0.5, 0.5),
            PerBand::new(0.5, 0.5, 0.5),
            PerBand::new(0.5, 0.5, 0.5),
        ];
        // IOIs 0.2, 0.5, 0.5: the first anchor stays alone
        let times = [0.0, 0.2, 0.7, 1.2];
        let inputs = RoleInputs::new(&energies).with_onset_times(&times);

        let roles = assign_roles_repetition(&inputs, &RoleConfig::default());

        assert_eq!(roles[0].p0, bands(&Band::ALL));
        assert_eq!(roles[0].p0_primary, Band::Mid);
        assert!(roles[0].p1.is_empty());
        assert!(roles[1].p1.is_empty());
        assert_eq!(roles[2].p1, bands(&Band::ALL));
    }

    #[test]
    fn test_broadband_or_low_dependency_blocks_p2() {
        let energies = vec![PerBand::new(0.9, 0.85, 0.3), PerBand::new(0.9, 0.3, 0.2)];
        let config = RoleConfig::default();

        let gated = RoleInputs::new(&energies).with_dependency(&[1.0, 0.2]);
        let roles = assign_roles_legacy(&gated, &config);

        // Top two within eps: broadband
        assert!(roles[0].p2.is_empty());
        // Dependency under threshold
        assert!(roles[1].p2.is_empty());

        let open = RoleInputs::new(&energies).with_dependency(&[1.0, 1.0]);
        let roles = assign_roles_legacy(&open, &config);
        assert_eq!(roles[1].p2, bands(&[Band::Mid, Band::High]));
    }

    #[test]
    fn test_legacy_p1_from_evidence() {
        let energies = vec![PerBand::new(0.9, 0.1, 0.1); 3];
        let times = [0.0, 0.5, 1.0];
        let temporal = [1.0; 3];
        let evidence = vec![BandEvidence { low: hit(0.8), ..BandEvidence::default() }; 3];
        let inputs = RoleInputs::new(&energies)
            .with_onset_times(&times)
            .with_temporal(&temporal)
            .with_band_evidence(&evidence);
        let config = RoleConfig {
            use_repetition_group: false,
            ..RoleConfig::default()
        };

        let roles = assign_roles_by_band(&inputs, &config);

        // First sighting scores 0.5; the second has no previous IOI to compare
        assert_eq!(roles[0].p1, bands(&[Band::Low]));
        assert!(roles[1].p1.is_empty());
        assert_eq!(roles[2].p1, bands(&[Band::Low]));
        for role in &roles {
            assert_eq!(role.p0, bands(&[Band::Low]));
        }
    }

    #[test]
    fn test_legacy_p1_from_energy_continuity() {
        let energies = vec![PerBand::new(0.9, 0.1, 0.05), PerBand::new(0.85, 0.9, 0.05)];
        let inputs = RoleInputs::new(&energies).with_temporal(&[1.0, 1.0]);

        let roles = assign_roles_legacy(&inputs, &RoleConfig::default());

        assert!(roles[0].p1.is_empty());
        assert_eq!(roles[1].p1, bands(&[Band::Low, Band::High]));
        assert_eq!(roles[1].p0_primary, Band::Mid);
    }

    #[test]
    fn test_composition_serializes_with_layer_keys() {
        let role = RoleComposition {
            p0: bands(&[Band::Low]),
            p0_primary: Band::Low,
            p1: bands(&[Band::Low, Band::High]),
            p2: BandSet::new(),
        };

        let json = serde_json::to_value(role).unwrap();
        assert_eq!(json["P0"], serde_json::json!(["low"]));
        assert_eq!(json["P0_primary"], "low");
        assert_eq!(json["P1"], serde_json::json!(["low", "high"]));
        assert_eq!(json["P2"], serde_json::json!([]));
    }

    #[test]
    fn test_no_anchors() {
        let inputs = RoleInputs::new(&[]);
        assert!(assign_roles_by_band(&inputs, &RoleConfig::default()).is_empty());
    }
}
