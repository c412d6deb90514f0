use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a user's past contests are chosen, per division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// The last `k` rated contests per division.
    Count,
    /// Contests within the trailing `k * 30` days, still capped at `k`
    /// per division (the cap intentionally mirrors count mode).
    Months,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Selection {
    pub mode: SelectionMode,
    pub k: u32,
}

/// Per-division aggregate over the selected contests.
///
/// The two rate fields are `None`, not zero, when their denominator is
/// unknown or zero; renderers surface that as "—" rather than "0%".
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub division: String,
    pub contests: u32,
    pub avg_attempted: f64,
    pub avg_solved: f64,
    pub avg_rating_delta: f64,
    pub avg_rank: Option<f64>,
    pub attempt_rate_pct: Option<f64>,
    pub acceptance_rate_pct: Option<f64>,
}

/// Per-letter aggregate within one division. `contests_with_letter` is the
/// denominator: how many selected contests had this letter at all.
#[derive(Debug, Clone, Serialize)]
pub struct LetterMetrics {
    pub letter: char,
    pub contests_with_letter: u32,
    pub attempt_count: u32,
    pub accept_count: u32,
    pub attempt_pct: Option<f64>,
    pub accept_pct: Option<f64>,
    /// Average time from contest start to the first accepted submission.
    pub indiv_time_avg_secs: Option<f64>,
    /// Average running total of solve times up to and including this
    /// letter, ordered by solve time within each contest.
    pub cumul_time_avg_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    /// One row per division with at least one selected contest, sorted by
    /// canonical division precedence, then alphabetically.
    pub rows: Vec<SummaryRow>,
    /// Letters A–G per division, emitted even when all counts are zero.
    pub letters_by_division: BTreeMap<String, Vec<LetterMetrics>>,
    /// Contests whose timing or problem count stayed unknown after the
    /// fallback lookups. Degraded, not dropped.
    pub unknown_meta_count: u32,
    pub contests_considered: u32,
}
