use serde::{Deserialize, Serialize};

/// One problem row from the shared catalog. Identity is `(contest_id, index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub contest_id: i64,
    /// Problem letter plus optional digit, e.g. "A", "C1".
    pub index: String,
    pub name: String,
    pub cf_rating: Option<i64>,
    pub clist_rating: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub accepted_count: Option<i64>,
    pub attempt_count: Option<i64>,
    pub total_users: Option<i64>,
    pub till_date_accepted: Option<i64>,
    pub problem_date: Option<String>,
    /// Last-known verdict for the configured handle. Local enrichment only;
    /// never present in the catalog response itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: i64,
    pub name: String,
    /// Free-text division/category label, e.g. "Div. 2".
    #[serde(rename = "type", default)]
    pub kind: String,
    pub duration_seconds: Option<i64>,
    pub start_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProblem {
    pub sheet_id: i64,
    pub contest_id: i64,
    pub index: String,
}

/// The four catalog collections, replaced atomically on every refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub problems: Vec<Problem>,
    pub contests: Vec<Contest>,
    pub sheets: Vec<Sheet>,
    pub sheet_problems: Vec<SheetProblem>,
}

/// Sorted vocabularies derived from the dataset for filter UI population.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMetadata {
    pub contest_types: Vec<String>,
    pub sheet_names: Vec<String>,
    pub problem_tags: Vec<String>,
}

/// Raw body of the catalog endpoint. Absent arrays default to empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub contests: Vec<Contest>,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
    #[serde(default, rename = "sheets_problems")]
    pub sheet_problems: Vec<SheetProblem>,
    #[serde(default, rename = "contestTypes")]
    pub contest_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One entry per contest the user was rated in (`user.rating`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub contest_id: i64,
    #[serde(default)]
    pub contest_name: String,
    pub rating_update_time_seconds: i64,
    pub rank: Option<i64>,
    pub old_rating: Option<i64>,
    pub new_rating: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub contest_id: Option<i64>,
    pub creation_time_seconds: i64,
    pub verdict: Option<String>,
    pub problem: SubmissionProblem,
    #[serde(default)]
    pub author: SubmissionAuthor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionProblem {
    pub index: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAuthor {
    pub participant_type: Option<String>,
}

/// One row of `contest.list`, used only for timing fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestListEntry {
    pub id: i64,
    pub start_time_seconds: Option<i64>,
    pub duration_seconds: Option<i64>,
}
