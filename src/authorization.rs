//! Role-based authorization for intake and review.
//!
//! A closed mapping, checked in one place:
//! 1. Engine tag → target collection (unknown tag → no collection)
//! 2. Target collection → required capability
//! 3. Role → granted capabilities (`admin` holds all of them)
//!
//! Default-deny: anything not listed here is refused.

use crate::models::{Capability, Role, TargetCollection};

/// Tags the extraction engine emits that name a collection indirectly.
const TAG_ALIASES: &[(&str, TargetCollection)] = &[
    ("financial_bill", TargetCollection::Invoice),
    ("legal_document", TargetCollection::Contract),
    ("schedule", TargetCollection::Task),
];

/// Resolve an engine-chosen tag to a known collection.
///
/// Matching ignores case and surrounding whitespace. Returns `None` for
/// anything outside the catalogue (including the engine's `general` fallback).
pub fn resolve_collection(tag: &str) -> Option<TargetCollection> {
    let normalized = tag.trim().to_ascii_lowercase();
    if let Ok(collection) = normalized.parse::<TargetCollection>() {
        return Some(collection);
    }
    TAG_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, collection)| *collection)
}

/// Capability needed to write into a collection.
pub fn required_capability(collection: TargetCollection) -> Capability {
    use TargetCollection::*;
    match collection {
        Employee | Attendance | Payroll => Capability::HrRecords,
        Invoice | Budget | Transaction | FinanceReport => Capability::FinanceRecords,
        Contract | Policy | Case | Regulatory => Capability::LegalRecords,
        Project | Task | Maintenance | Report => Capability::EngineeringRecords,
    }
}

/// Capabilities granted to a role.
pub fn capabilities(role: Role) -> &'static [Capability] {
    match role {
        Role::Admin => Capability::all(),
        Role::Hr => &[Capability::HrRecords],
        Role::Finance => &[Capability::FinanceRecords],
        Role::Legal => &[Capability::LegalRecords],
        Role::Engineer => &[Capability::EngineeringRecords],
    }
}

pub fn can_write(role: Role, collection: TargetCollection) -> bool {
    capabilities(role).contains(&required_capability(collection))
}

/// Whether a role may upload documents for extraction.
pub fn can_submit(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Hr)
}

/// Whether a role may discard a result carrying the given tag.
///
/// Results with an unrecognized tag can only be discarded by `admin`.
pub fn can_reject(role: Role, tag: &str) -> bool {
    match resolve_collection(tag) {
        Some(collection) => can_write(role, collection),
        None => role == Role::Admin,
    }
}
