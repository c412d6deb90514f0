pub mod types;

pub use types::*;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::types::{ContestListEntry, Dataset, RatingChange, Submission};
use crate::error::{Error, Result};

/// Problem letters tracked by the per-letter breakdowns.
const TRACKED_LETTERS: std::ops::RangeInclusive<char> = 'A'..='G';

const LETTER_COUNT: usize = 7;

/// Best-effort lookups used to repair contests whose timing or problem
/// list is missing from the dataset.
#[async_trait]
pub trait ContestMetaSource: Send + Sync {
    async fn contest_list(&self) -> Result<Vec<ContestListEntry>>;
    async fn contest_problem_indexes(&self, contest_id: i64) -> Result<Vec<String>>;
}

/// Turns a user's contest history into per-division summary rows and
/// per-letter breakdowns.
///
/// The engine owns no persistent state. The two memo caches only skip
/// repeated fallback lookups within a session; they change latency, never
/// results. Only successful lookups are memoized, so a failed one may be
/// retried by a later call.
pub struct SummaryEngine {
    source: Arc<dyn ContestMetaSource>,
    listing: Mutex<Option<HashMap<i64, (Option<i64>, Option<i64>)>>>,
    standings: Mutex<HashMap<i64, Vec<String>>>,
}

struct ContestCtx {
    start: Option<i64>,
    duration: Option<i64>,
    problem_count: Option<u32>,
    letters: BTreeSet<char>,
    attempted: HashSet<String>,
    solved: HashSet<String>,
    /// Earliest accepted time per letter, relative to contest start.
    ok_times: HashMap<char, i64>,
}

impl ContestCtx {
    fn end(&self) -> Option<i64> {
        self.start.zip(self.duration).map(|(s, d)| s + d)
    }

    fn meta_unknown(&self) -> bool {
        self.start.is_none() || self.duration.is_none() || self.problem_count.is_none()
    }
}

#[derive(Clone, Default)]
struct LetterAcc {
    denom: u32,
    attempts: u32,
    accepts: u32,
    indiv_sum: f64,
    indiv_count: u32,
    cumul_sum: f64,
    cumul_count: u32,
}

impl SummaryEngine {
    pub fn new(source: Arc<dyn ContestMetaSource>) -> Self {
        Self {
            source,
            listing: Mutex::new(None),
            standings: Mutex::new(HashMap::new()),
        }
    }

    pub async fn compute_summaries(
        &self,
        dataset: &Dataset,
        rating_history: &[RatingChange],
        submissions: &[Submission],
        selection: &Selection,
    ) -> Result<SummaryReport> {
        self.compute_at(
            dataset,
            rating_history,
            submissions,
            selection,
            chrono::Utc::now().timestamp(),
        )
        .await
    }

    /// Like [`compute_summaries`](Self::compute_summaries) with an
    /// explicit "now" for the months-mode window.
    pub async fn compute_at(
        &self,
        dataset: &Dataset,
        rating_history: &[RatingChange],
        submissions: &[Submission],
        selection: &Selection,
        now_secs: i64,
    ) -> Result<SummaryReport> {
        if selection.k == 0 {
            return Err(Error::InvalidSelection("k must be positive".into()));
        }
        if dataset.contests.is_empty() {
            return Err(Error::NotFound("dataset has no contests".into()));
        }
        if rating_history.is_empty() {
            return Err(Error::NotFound("no rating history".into()));
        }
        if submissions.is_empty() {
            return Err(Error::NotFound("no submissions".into()));
        }

        let divisions: HashMap<i64, (String, u8)> = dataset
            .contests
            .iter()
            .map(|c| (c.id, canonical_division(&c.kind)))
            .collect();

        let groups = select_recent(rating_history, &divisions, selection, now_secs);

        // Per-contest metadata from the dataset itself.
        let mut problem_meta: HashMap<i64, (u32, BTreeSet<char>)> = HashMap::new();
        for p in &dataset.problems {
            let entry = problem_meta.entry(p.contest_id).or_default();
            entry.0 += 1;
            if let Some(letter) = tracked_letter(&p.index) {
                entry.1.insert(letter);
            }
        }
        let contest_times: HashMap<i64, (Option<i64>, Option<i64>)> = dataset
            .contests
            .iter()
            .map(|c| (c.id, (c.start_time, c.duration_seconds)))
            .collect();

        let mut ctxs: HashMap<i64, ContestCtx> = HashMap::new();
        for entries in groups.values() {
            for rc in entries {
                let (start, duration) = contest_times
                    .get(&rc.contest_id)
                    .copied()
                    .unwrap_or((None, None));
                let (problem_count, letters) = match problem_meta.get(&rc.contest_id) {
                    Some((count, letters)) => (Some(*count), letters.clone()),
                    None => (None, BTreeSet::new()),
                };
                ctxs.insert(
                    rc.contest_id,
                    ContestCtx {
                        start,
                        duration,
                        problem_count,
                        letters,
                        attempted: HashSet::new(),
                        solved: HashSet::new(),
                        ok_times: HashMap::new(),
                    },
                );
            }
        }

        self.enrich(&mut ctxs).await;
        let unknown_meta_count = ctxs.values().filter(|c| c.meta_unknown()).count() as u32;

        attribute(&mut ctxs, submissions);

        // Per-division aggregation.
        let mut rows: Vec<SummaryRow> = Vec::new();
        let mut letters_by_division: BTreeMap<String, Vec<LetterMetrics>> = BTreeMap::new();
        let mut contests_considered = 0u32;

        for (division, entries) in &groups {
            let mut contests = 0u32;
            let mut attempted_total = 0u32;
            let mut solved_total = 0u32;
            let mut known_problem_total = 0u32;
            let mut delta_sum = 0.0f64;
            let mut rank_sum = 0.0f64;
            let mut rank_count = 0u32;
            let mut acc = vec![LetterAcc::default(); LETTER_COUNT];

            for rc in entries {
                let Some(ctx) = ctxs.get(&rc.contest_id) else {
                    continue;
                };
                contests += 1;
                attempted_total += ctx.attempted.len() as u32;
                solved_total += ctx.solved.len() as u32;
                if let Some(count) = ctx.problem_count {
                    known_problem_total += count;
                }
                if let (Some(old), Some(new)) = (rc.old_rating, rc.new_rating) {
                    delta_sum += (new - old) as f64;
                }
                if let Some(rank) = rc.rank {
                    rank_sum += rank as f64;
                    rank_count += 1;
                }

                // Running total of this contest's solve times, ordered by
                // solve time, attributed to the letter solved at that point.
                let mut ordered: Vec<(i64, char)> =
                    ctx.ok_times.iter().map(|(l, t)| (*t, *l)).collect();
                ordered.sort_unstable();
                let mut running = 0i64;
                let mut cumul: HashMap<char, i64> = HashMap::new();
                for (t, letter) in ordered {
                    running += t;
                    cumul.insert(letter, running);
                }

                for (i, letter) in TRACKED_LETTERS.enumerate() {
                    if !ctx.letters.contains(&letter) {
                        continue;
                    }
                    let a = &mut acc[i];
                    a.denom += 1;
                    if ctx.attempted.iter().any(|idx| idx.starts_with(letter)) {
                        a.attempts += 1;
                    }
                    if ctx.solved.iter().any(|idx| idx.starts_with(letter)) {
                        a.accepts += 1;
                    }
                    if let Some(t) = ctx.ok_times.get(&letter) {
                        a.indiv_sum += *t as f64;
                        a.indiv_count += 1;
                        a.cumul_sum += cumul[&letter] as f64;
                        a.cumul_count += 1;
                    }
                }
            }

            contests_considered += contests;
            rows.push(SummaryRow {
                division: division.clone(),
                contests,
                avg_attempted: attempted_total as f64 / contests as f64,
                avg_solved: solved_total as f64 / contests as f64,
                avg_rating_delta: delta_sum / contests as f64,
                avg_rank: (rank_count > 0).then(|| rank_sum / rank_count as f64),
                attempt_rate_pct: (known_problem_total > 0)
                    .then(|| 100.0 * attempted_total as f64 / known_problem_total as f64),
                acceptance_rate_pct: (attempted_total > 0)
                    .then(|| 100.0 * solved_total as f64 / attempted_total as f64),
            });

            let letter_rows: Vec<LetterMetrics> = TRACKED_LETTERS
                .zip(acc)
                .map(|(letter, a)| LetterMetrics {
                    letter,
                    contests_with_letter: a.denom,
                    attempt_count: a.attempts,
                    accept_count: a.accepts,
                    attempt_pct: (a.denom > 0).then(|| 100.0 * a.attempts as f64 / a.denom as f64),
                    accept_pct: (a.denom > 0).then(|| 100.0 * a.accepts as f64 / a.denom as f64),
                    indiv_time_avg_secs: (a.indiv_count > 0)
                        .then(|| a.indiv_sum / a.indiv_count as f64),
                    cumul_time_avg_secs: (a.cumul_count > 0)
                        .then(|| a.cumul_sum / a.cumul_count as f64),
                })
                .collect();
            letters_by_division.insert(division.clone(), letter_rows);
        }

        let precedence: HashMap<&String, u8> = groups
            .keys()
            .map(|d| (d, division_precedence(&divisions, d)))
            .collect();
        rows.sort_by(|a, b| {
            precedence[&a.division]
                .cmp(&precedence[&b.division])
                .then_with(|| a.division.cmp(&b.division))
        });

        Ok(SummaryReport {
            rows,
            letters_by_division,
            unknown_meta_count,
            contests_considered,
        })
    }

    /// Fill missing timing from `contest.list` (fetched once per engine)
    /// and missing problem lists from per-contest standings. Failures are
    /// logged and leave the field unknown; the contest stays in.
    async fn enrich(&self, ctxs: &mut HashMap<i64, ContestCtx>) {
        let needs_time: Vec<i64> = ctxs
            .iter()
            .filter(|(_, c)| c.start.is_none() || c.duration.is_none())
            .map(|(id, _)| *id)
            .collect();
        if !needs_time.is_empty() {
            let mut listing = self.listing.lock().await;
            if listing.is_none() {
                match self.source.contest_list().await {
                    Ok(entries) => {
                        *listing = Some(
                            entries
                                .into_iter()
                                .map(|e| (e.id, (e.start_time_seconds, e.duration_seconds)))
                                .collect(),
                        );
                    }
                    Err(e) => log::warn!("contest list fallback failed: {e}"),
                }
            }
            if let Some(map) = listing.as_ref() {
                for id in needs_time {
                    if let (Some(ctx), Some((start, duration))) =
                        (ctxs.get_mut(&id), map.get(&id))
                    {
                        if ctx.start.is_none() {
                            ctx.start = *start;
                        }
                        if ctx.duration.is_none() {
                            ctx.duration = *duration;
                        }
                    }
                }
            }
        }

        let needs_problems: Vec<i64> = ctxs
            .iter()
            .filter(|(_, c)| c.problem_count.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in needs_problems {
            let indexes = {
                let mut memo = self.standings.lock().await;
                match memo.get(&id) {
                    Some(cached) => Some(cached.clone()),
                    None => match self.source.contest_problem_indexes(id).await {
                        Ok(fresh) => {
                            memo.insert(id, fresh.clone());
                            Some(fresh)
                        }
                        Err(e) => {
                            log::warn!("standings fallback for contest {id} failed: {e}");
                            None
                        }
                    },
                }
            };
            if let (Some(ctx), Some(indexes)) = (ctxs.get_mut(&id), indexes) {
                ctx.problem_count = Some(indexes.len() as u32);
                ctx.letters = indexes.iter().filter_map(|idx| tracked_letter(idx)).collect();
            }
        }
    }
}

/// Attribute submissions to the selected contests: unknown contests,
/// virtual participation, and out-of-window timestamps are skipped.
fn attribute(ctxs: &mut HashMap<i64, ContestCtx>, submissions: &[Submission]) {
    for s in submissions {
        let Some(contest_id) = s.contest_id else {
            continue;
        };
        let Some(ctx) = ctxs.get_mut(&contest_id) else {
            continue;
        };
        if s.author.participant_type.as_deref() == Some("VIRTUAL") {
            continue;
        }
        if let (Some(start), Some(end)) = (ctx.start, ctx.end()) {
            if s.creation_time_seconds < start || s.creation_time_seconds > end {
                continue;
            }
        }
        ctx.attempted.insert(s.problem.index.clone());
        if s.verdict.as_deref() == Some("OK") {
            ctx.solved.insert(s.problem.index.clone());
            if let (Some(letter), Some(start)) = (tracked_letter(&s.problem.index), ctx.start) {
                let t = s.creation_time_seconds - start;
                ctx.ok_times
                    .entry(letter)
                    .and_modify(|cur| *cur = (*cur).min(t))
                    .or_insert(t);
            }
        }
    }
}

/// Group rating changes by canonical division, then keep the most recent
/// `k` per division. Months mode additionally filters to the trailing
/// `k * 30` days before applying the same cap (double-limiting kept for
/// compatibility with the observed behavior).
fn select_recent<'a>(
    rating_history: &'a [RatingChange],
    divisions: &HashMap<i64, (String, u8)>,
    selection: &Selection,
    now_secs: i64,
) -> HashMap<String, Vec<&'a RatingChange>> {
    let cutoff = match selection.mode {
        SelectionMode::Count => None,
        SelectionMode::Months => Some(now_secs - selection.k as i64 * 30 * 86_400),
    };

    let mut groups: HashMap<String, Vec<&RatingChange>> = HashMap::new();
    for rc in rating_history {
        let Some((division, _)) = divisions.get(&rc.contest_id) else {
            continue;
        };
        if let Some(cutoff) = cutoff {
            if rc.rating_update_time_seconds < cutoff {
                continue;
            }
        }
        groups.entry(division.clone()).or_default().push(rc);
    }

    let k = selection.k as usize;
    for entries in groups.values_mut() {
        if entries.len() > k {
            let excess = entries.len() - k;
            entries.drain(..excess);
        }
    }
    groups
}

/// Map a raw contest-type label to its canonical division and precedence.
/// Unmatched labels pass through with lowest sort priority.
fn canonical_division(raw: &str) -> (String, u8) {
    let lower = raw.to_lowercase();
    let has_div = |n: u32| {
        lower.contains(&format!("div. {n}"))
            || lower.contains(&format!("div.{n}"))
            || lower.contains(&format!("div {n}"))
    };

    if lower.contains("educational") {
        ("Div. 2 (Educational)".to_string(), 5)
    } else if lower.contains("global") {
        ("Global".to_string(), 6)
    } else if has_div(1) && has_div(2) {
        ("Div. 1 + Div. 2".to_string(), 1)
    } else if has_div(1) {
        ("Div. 1".to_string(), 0)
    } else if has_div(2) {
        ("Div. 2".to_string(), 2)
    } else if has_div(3) {
        ("Div. 3".to_string(), 3)
    } else if has_div(4) {
        ("Div. 4".to_string(), 4)
    } else {
        (raw.to_string(), u8::MAX)
    }
}

fn division_precedence(divisions: &HashMap<i64, (String, u8)>, division: &str) -> u8 {
    divisions
        .values()
        .find(|(label, _)| label == division)
        .map(|(_, prec)| *prec)
        .unwrap_or(u8::MAX)
}

/// First character of a problem index, if it is a tracked letter (A–G).
fn tracked_letter(index: &str) -> Option<char> {
    index.chars().next().filter(|c| TRACKED_LETTERS.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{Contest, Problem, SubmissionAuthor, SubmissionProblem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T: i64 = 1_700_000_000;

    /// A source that must never be reached.
    struct UnavailableMetaSource;

    #[async_trait]
    impl ContestMetaSource for UnavailableMetaSource {
        async fn contest_list(&self) -> Result<Vec<ContestListEntry>> {
            Err(Error::Transport("unavailable".into()))
        }

        async fn contest_problem_indexes(&self, _contest_id: i64) -> Result<Vec<String>> {
            Err(Error::Transport("unavailable".into()))
        }
    }

    struct StaticMetaSource {
        listing: Vec<(i64, i64, i64)>,
        standings: HashMap<i64, Vec<String>>,
        list_calls: AtomicUsize,
        standings_calls: AtomicUsize,
    }

    #[async_trait]
    impl ContestMetaSource for StaticMetaSource {
        async fn contest_list(&self) -> Result<Vec<ContestListEntry>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .listing
                .iter()
                .map(|(id, start, duration)| ContestListEntry {
                    id: *id,
                    start_time_seconds: Some(*start),
                    duration_seconds: Some(*duration),
                })
                .collect())
        }

        async fn contest_problem_indexes(&self, contest_id: i64) -> Result<Vec<String>> {
            self.standings_calls.fetch_add(1, Ordering::SeqCst);
            self.standings
                .get(&contest_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("contest {contest_id}")))
        }
    }

    fn contest(id: i64, kind: &str, start: Option<i64>, duration: Option<i64>) -> Contest {
        Contest {
            id,
            name: format!("Round {id}"),
            kind: kind.to_string(),
            duration_seconds: duration,
            start_time: start,
        }
    }

    fn problem(contest_id: i64, index: &str) -> Problem {
        Problem {
            contest_id,
            index: index.to_string(),
            name: format!("{contest_id}{index}"),
            cf_rating: None,
            clist_rating: None,
            tags: vec![],
            accepted_count: None,
            attempt_count: None,
            total_users: None,
            till_date_accepted: None,
            problem_date: None,
            last_verdict: None,
        }
    }

    fn rating_change(contest_id: i64, time: i64, old: i64, new: i64) -> RatingChange {
        RatingChange {
            contest_id,
            contest_name: format!("Round {contest_id}"),
            rating_update_time_seconds: time,
            rank: Some(100),
            old_rating: Some(old),
            new_rating: Some(new),
        }
    }

    fn submission(
        id: i64,
        contest_id: i64,
        index: &str,
        verdict: &str,
        time: i64,
        participant: &str,
    ) -> Submission {
        Submission {
            id,
            contest_id: Some(contest_id),
            creation_time_seconds: time,
            verdict: Some(verdict.to_string()),
            problem: SubmissionProblem {
                index: index.to_string(),
            },
            author: SubmissionAuthor {
                participant_type: Some(participant.to_string()),
            },
        }
    }

    fn div2_dataset() -> Dataset {
        Dataset {
            problems: vec![problem(1, "A"), problem(1, "B"), problem(1, "C")],
            contests: vec![contest(1, "Div. 2", Some(T), Some(7200))],
            sheets: vec![],
            sheet_problems: vec![],
        }
    }

    fn count_selection(k: u32) -> Selection {
        Selection {
            mode: SelectionMode::Count,
            k,
        }
    }

    #[tokio::test]
    async fn test_div2_worked_example() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = div2_dataset();
        let ratings = vec![rating_change(1, T + 7200, 1400, 1450)];
        let subs = vec![
            submission(10, 1, "A", "OK", T + 600, "CONTESTANT"),
            submission(11, 1, "B", "WRONG_ANSWER", T + 1200, "CONTESTANT"),
        ];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        assert_eq!(report.contests_considered, 1);
        assert_eq!(report.unknown_meta_count, 0);
        assert_eq!(report.rows.len(), 1);

        let row = &report.rows[0];
        assert_eq!(row.division, "Div. 2");
        assert_eq!(row.contests, 1);
        assert_eq!(row.avg_attempted, 2.0);
        assert_eq!(row.avg_solved, 1.0);
        assert_eq!(row.avg_rating_delta, 50.0);
        assert_eq!(row.avg_rank, Some(100.0));
        assert!((row.attempt_rate_pct.unwrap() - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(row.acceptance_rate_pct, Some(50.0));

        let letters = &report.letters_by_division["Div. 2"];
        let a = &letters[0];
        assert_eq!((a.letter, a.contests_with_letter), ('A', 1));
        assert_eq!((a.attempt_count, a.accept_count), (1, 1));
        assert_eq!(a.indiv_time_avg_secs, Some(600.0));
        assert_eq!(a.cumul_time_avg_secs, Some(600.0));

        let b = &letters[1];
        assert_eq!((b.attempt_count, b.accept_count), (1, 0));
        assert_eq!(b.indiv_time_avg_secs, None);

        // C exists in the contest, so its denominator is still 1.
        let c = &letters[2];
        assert_eq!(c.contests_with_letter, 1);
        assert_eq!((c.attempt_count, c.accept_count), (0, 0));
        assert_eq!(c.attempt_pct, Some(0.0));
    }

    #[tokio::test]
    async fn test_out_of_window_and_virtual_submissions_excluded() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = div2_dataset();
        let ratings = vec![rating_change(1, T + 7200, 1400, 1450)];
        let subs = vec![
            submission(10, 1, "A", "OK", T - 100, "CONTESTANT"), // before start
            submission(11, 1, "B", "OK", T + 9999, "CONTESTANT"), // after end
            submission(12, 1, "C", "OK", T + 600, "VIRTUAL"),    // virtual
            submission(13, 1, "A", "OK", T + 300, "CONTESTANT"),
        ];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        let row = &report.rows[0];
        assert_eq!(row.avg_attempted, 1.0);
        assert_eq!(row.avg_solved, 1.0);
    }

    #[tokio::test]
    async fn test_earliest_ok_time_and_cumulative_ordering() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = div2_dataset();
        let ratings = vec![rating_change(1, T + 7200, 1400, 1450)];
        // B solved before A; a later duplicate OK on B must not move its time.
        let subs = vec![
            submission(10, 1, "B", "OK", T + 400, "CONTESTANT"),
            submission(11, 1, "A", "OK", T + 1000, "CONTESTANT"),
            submission(12, 1, "B", "OK", T + 2000, "CONTESTANT"),
        ];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        let letters = &report.letters_by_division["Div. 2"];
        assert_eq!(letters[1].indiv_time_avg_secs, Some(400.0));
        assert_eq!(letters[1].cumul_time_avg_secs, Some(400.0));
        assert_eq!(letters[0].indiv_time_avg_secs, Some(1000.0));
        // A was the second solve: cumulative = 400 + 1000.
        assert_eq!(letters[0].cumul_time_avg_secs, Some(1400.0));
    }

    #[tokio::test]
    async fn test_letters_outside_tracked_range_ignored_in_breakdown() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let mut dataset = div2_dataset();
        dataset.problems.push(problem(1, "H"));
        let ratings = vec![rating_change(1, T + 7200, 1400, 1450)];
        let subs = vec![submission(10, 1, "H", "OK", T + 600, "CONTESTANT")];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        // H counts toward the raw attempted/solved totals...
        let row = &report.rows[0];
        assert_eq!(row.avg_attempted, 1.0);
        assert_eq!(row.avg_solved, 1.0);
        // ...but never appears in the per-letter table.
        let letters = &report.letters_by_division["Div. 2"];
        assert_eq!(letters.len(), 7);
        assert!(letters.iter().all(|l| l.attempt_count == 0));
    }

    #[tokio::test]
    async fn test_unknown_metadata_contest_degrades_but_still_counts() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = Dataset {
            problems: vec![], // nothing known about contest 2's problems
            contests: vec![contest(2, "Div. 3", None, None)],
            sheets: vec![],
            sheet_problems: vec![],
        };
        let ratings = vec![rating_change(2, T, 900, 950)];
        let subs = vec![submission(10, 2, "A", "OK", T - 500, "CONTESTANT")];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        assert_eq!(report.unknown_meta_count, 1);
        let row = &report.rows[0];
        assert_eq!(row.division, "Div. 3");
        // Window unknown, so the submission is attributed.
        assert_eq!(row.avg_attempted, 1.0);
        assert_eq!(row.avg_solved, 1.0);
        assert_eq!(row.attempt_rate_pct, None);
        assert_eq!(row.acceptance_rate_pct, Some(100.0));
    }

    #[tokio::test]
    async fn test_fallback_enrichment_fills_meta_and_memoizes() {
        let source = Arc::new(StaticMetaSource {
            listing: vec![(3, T, 7200)],
            standings: HashMap::from([(3, vec!["A".to_string(), "B".to_string()])]),
            list_calls: AtomicUsize::new(0),
            standings_calls: AtomicUsize::new(0),
        });
        let engine = SummaryEngine::new(source.clone());
        let dataset = Dataset {
            problems: vec![],
            contests: vec![contest(3, "Div. 1", None, None)],
            sheets: vec![],
            sheet_problems: vec![],
        };
        let ratings = vec![rating_change(3, T + 7200, 1900, 1950)];
        let subs = vec![submission(10, 3, "A", "OK", T + 900, "CONTESTANT")];

        let first = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();
        assert_eq!(first.unknown_meta_count, 0);
        assert_eq!(first.rows[0].attempt_rate_pct, Some(50.0));
        let letters = &first.letters_by_division["Div. 1"];
        assert_eq!(letters[0].indiv_time_avg_secs, Some(900.0));
        assert_eq!(letters[1].contests_with_letter, 1);

        // Second run hits the memo caches and yields identical output.
        let second = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.standings_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_rows_sorted_by_division_precedence() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = Dataset {
            problems: vec![problem(1, "A"), problem(2, "A"), problem(3, "A")],
            contests: vec![
                contest(1, "Div. 2", Some(T), Some(7200)),
                contest(2, "Div. 1", Some(T), Some(7200)),
                contest(3, "April Fools", Some(T), Some(7200)),
            ],
            sheets: vec![],
            sheet_problems: vec![],
        };
        let ratings = vec![
            rating_change(1, T + 7200, 1400, 1450),
            rating_change(2, T + 7200, 1900, 1950),
            rating_change(3, T + 7200, 1500, 1500),
        ];
        let subs = vec![submission(10, 1, "A", "OK", T + 600, "CONTESTANT")];

        let report = engine
            .compute_summaries(&dataset, &ratings, &subs, &count_selection(1))
            .await
            .unwrap();

        let order: Vec<&str> = report.rows.iter().map(|r| r.division.as_str()).collect();
        assert_eq!(order, vec!["Div. 1", "Div. 2", "April Fools"]);
    }

    #[tokio::test]
    async fn test_invalid_selection_and_missing_inputs_are_fatal() {
        let engine = SummaryEngine::new(Arc::new(UnavailableMetaSource));
        let dataset = div2_dataset();
        let ratings = vec![rating_change(1, T + 7200, 1400, 1450)];
        let subs = vec![submission(10, 1, "A", "OK", T + 600, "CONTESTANT")];

        assert!(matches!(
            engine
                .compute_summaries(&dataset, &ratings, &subs, &count_selection(0))
                .await,
            Err(Error::InvalidSelection(_))
        ));
        assert!(matches!(
            engine
                .compute_summaries(&dataset, &[], &subs, &count_selection(1))
                .await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine
                .compute_summaries(&dataset, &ratings, &[], &count_selection(1))
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_select_recent_count_keeps_last_k_per_division() {
        let divisions: HashMap<i64, (String, u8)> = (1..=4)
            .map(|id| (id, ("Div. 2".to_string(), 2)))
            .collect();
        let history: Vec<RatingChange> = (1..=4)
            .map(|id| rating_change(id, T + id * 1000, 1400, 1450))
            .collect();

        let groups = select_recent(&history, &divisions, &count_selection(2), T + 10_000);
        let selected: Vec<i64> = groups["Div. 2"].iter().map(|rc| rc.contest_id).collect();
        assert_eq!(selected, vec![3, 4]);
    }

    #[test]
    fn test_select_recent_months_double_limits() {
        let divisions: HashMap<i64, (String, u8)> = (1..=4)
            .map(|id| (id, ("Div. 2".to_string(), 2)))
            .collect();
        let now = T;
        let day = 86_400;
        let history = vec![
            rating_change(1, now - 45 * day, 1400, 1410), // outside the 30-day window
            rating_change(2, now - 20 * day, 1410, 1420),
            rating_change(3, now - 10 * day, 1420, 1430),
            rating_change(4, now - 2 * day, 1430, 1440),
        ];

        // k=1 month filters to the last 30 days AND caps at 1 per division.
        let selection = Selection {
            mode: SelectionMode::Months,
            k: 1,
        };
        let groups = select_recent(&history, &divisions, &selection, now);
        let selected: Vec<i64> = groups["Div. 2"].iter().map(|rc| rc.contest_id).collect();
        assert_eq!(selected, vec![4]);
    }

    #[test]
    fn test_select_recent_drops_unknown_contests() {
        let divisions: HashMap<i64, (String, u8)> =
            HashMap::from([(1, ("Div. 2".to_string(), 2))]);
        let history = vec![
            rating_change(1, T, 1400, 1450),
            rating_change(99, T, 1450, 1460),
        ];

        let groups = select_recent(&history, &divisions, &count_selection(5), T);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["Div. 2"].len(), 1);
    }

    #[test]
    fn test_canonical_division_variants() {
        assert_eq!(canonical_division("Div. 1"), ("Div. 1".into(), 0));
        assert_eq!(
            canonical_division("Div. 1 + Div. 2"),
            ("Div. 1 + Div. 2".into(), 1)
        );
        assert_eq!(canonical_division("Div.1 + Div.2"), ("Div. 1 + Div. 2".into(), 1));
        assert_eq!(canonical_division("Div. 2"), ("Div. 2".into(), 2));
        assert_eq!(canonical_division("Div. 3"), ("Div. 3".into(), 3));
        assert_eq!(canonical_division("Div. 4"), ("Div. 4".into(), 4));
        assert_eq!(
            canonical_division("Educational, Rated for Div. 2"),
            ("Div. 2 (Educational)".into(), 5)
        );
        assert_eq!(canonical_division("Global Round"), ("Global".into(), 6));
        assert_eq!(
            canonical_division("Kotlin Heroes"),
            ("Kotlin Heroes".into(), u8::MAX)
        );
    }

    #[test]
    fn test_tracked_letter_bounds() {
        assert_eq!(tracked_letter("A1"), Some('A'));
        assert_eq!(tracked_letter("G"), Some('G'));
        assert_eq!(tracked_letter("H"), None);
        assert_eq!(tracked_letter(""), None);
    }
}
