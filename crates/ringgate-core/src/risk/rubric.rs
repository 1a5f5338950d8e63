//! Normalisation rubrics: each maps one evidence input onto 0-100,
//! where 100 is the riskiest value.

use super::evidence::{ChangeKind, PriorRing, VulnerabilityCounts};

/// Cohort-size bands.
pub fn blast_radius(target_count: u32) -> f64 {
    match target_count {
        0 => 0.0,
        1..=10 => 10.0,
        11..=100 => 25.0,
        101..=1_000 => 50.0,
        1_001..=10_000 => 75.0,
        _ => 100.0,
    }
}

pub fn change_kind(kind: ChangeKind) -> f64 {
    match kind {
        ChangeKind::ConfigChange => 20.0,
        ChangeKind::Update => 40.0,
        ChangeKind::NewInstall => 60.0,
        ChangeKind::Uninstall => 70.0,
        ChangeKind::Privileged => 100.0,
    }
}

/// 50 per critical, 20 per high, 5 per medium, capped at 100.
pub fn vulnerabilities(counts: VulnerabilityCounts) -> f64 {
    let raw = u64::from(counts.critical) * 50
        + u64::from(counts.high) * 20
        + u64::from(counts.medium) * 5;
    raw.min(100) as f64
}

pub fn signature(verified: bool) -> f64 {
    if verified {
        0.0
    } else {
        100.0
    }
}

/// A first ring has no history and sits at the midpoint.
pub fn prior_ring(prior: PriorRing) -> f64 {
    match prior {
        PriorRing::FirstRing => 50.0,
        PriorRing::Measured { success_rate } => f64::from(100 - success_rate.min(100)),
    }
}

/// Position in the ring sequence; the last ring is full exposure.
pub fn exposure(ring_index: usize, ring_count: usize) -> f64 {
    if ring_count <= 1 {
        return 100.0;
    }
    (ring_index as f64 * 100.0) / (ring_count - 1) as f64
}
