// Roles module
// Per-anchor, band-resolved P0/P1/P2 composition

pub mod compose;
pub mod evidence;
pub mod repetition;

pub use compose::{
    assign_roles_by_band, assign_roles_legacy, assign_roles_repetition, RoleComposition,
    RoleConfig, RoleInputs, RoleStrategy,
};
pub use evidence::{collect_band_evidence, BandEvidence, BandHit};
pub use repetition::{group_members, repetition_groups};
