//! Record schema and exclusion filtering.
//!
//! The dashboard returns loosely-shaped JSON; normalization to the fixed
//! four-field schema happens exactly once, here, never at render time.

use std::collections::HashSet;

use serde::Deserialize;

/// One aggregated error record as the dashboard returns it. Fields may be
/// missing or null on the wire.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    pub class: Option<String>,
    pub service: Option<String>,
    #[serde(rename = "msg")]
    pub message: Option<String>,
    pub count: Option<u64>,
}

/// A normalized record: strings default to empty, count to zero, and the
/// `class` is guaranteed not to be on the exclusion list once filtered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilteredRecord {
    pub class: String,
    pub service: String,
    pub message: String,
    pub count: u64,
}

pub fn normalize(records: Vec<RawRecord>) -> Vec<FilteredRecord> {
    records
        .into_iter()
        .map(|r| FilteredRecord {
            class: r.class.unwrap_or_default(),
            service: r.service.unwrap_or_default(),
            message: r.message.unwrap_or_default(),
            count: r.count.unwrap_or_default(),
        })
        .collect()
}

pub fn apply_exclusions(
    records: Vec<FilteredRecord>,
    excluded: &HashSet<String>,
) -> Vec<FilteredRecord> {
    records
        .into_iter()
        .filter(|r| !excluded.contains(&r.class))
        .collect()
}

pub fn normalize_and_filter(
    records: Vec<RawRecord>,
    excluded: &HashSet<String>,
) -> Vec<FilteredRecord> {
    apply_exclusions(normalize(records), excluded)
}
