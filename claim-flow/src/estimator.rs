//! Damage-to-cost estimator.
//!
//! Two tiers with no blending: an itemized pass over the damage descriptions
//! first, then a severity-indexed flat table when nothing matched. The
//! itemized pass is greedy and order dependent: each description settles on
//! the first candidate part whose name appears inside it, and a part is
//! counted once per description that mentions it. Expected amounts elsewhere
//! are calibrated to these exact semantics.

use crate::model::{DamageReport, PartPrice};

/// Price a damage report against the candidate parts for the vehicle.
///
/// Matching is case-insensitive substring containment of the part name in
/// the damage description; a match adds `price_tokunbo + labor_cost`. A zero
/// total after all descriptions falls back to the severity base table.
pub fn estimate(report: &DamageReport, candidate_parts: &[PartPrice]) -> i64 {
    let mut total = 0;
    for description in &report.damage_summary {
        let description = description.to_lowercase();
        let matched = candidate_parts
            .iter()
            .find(|part| description.contains(&part.part_name.to_lowercase()));
        if let Some(part) = matched {
            total += part.price_tokunbo + part.labor_cost;
        }
    }
    if total == 0 {
        total = report.severity.base_estimate();
    }
    total
}
