use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::types::{CatalogResponse, Dataset, FilterMetadata, Submission};
use crate::api::CfApi;
use crate::error::Result;
use crate::storage::{repository, Database};
use crate::sync::{Refresher, CONFIG_USER_HANDLE};

/// app_config key holding the derived [`FilterMetadata`] as JSON.
pub const CONFIG_FILTER_METADATA: &str = "filter_metadata";

/// Pulls the shared catalog and replaces the durable copy wholesale.
pub struct DatasetFetcher {
    db: Database,
    api: Arc<CfApi>,
}

impl DatasetFetcher {
    pub fn new(db: Database, api: Arc<CfApi>) -> Self {
        Self { db, api }
    }

    async fn configured_handle(&self) -> Result<Option<String>> {
        let handle = self
            .db
            .reader()
            .call(|conn| repository::get_config(conn, CONFIG_USER_HANDLE))
            .await?;
        Ok(handle)
    }

    /// Merge the configured user's last-known verdicts onto matching
    /// catalog problems.
    async fn merge_user_verdicts(&self, handle: &str) -> Result<usize> {
        let submissions = self.api.user_status(handle).await?;
        let verdicts = last_verdicts(&submissions);
        let merged = verdicts.len();
        self.db
            .writer()
            .call(move |conn| {
                for ((contest_id, index), verdict) in &verdicts {
                    repository::update_problem_verdict(conn, *contest_id, index, verdict)?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await?;
        Ok(merged)
    }
}

#[async_trait]
impl Refresher for DatasetFetcher {
    async fn refresh(&self) -> Result<()> {
        // Fetch and validate before touching the store; a failed fetch
        // leaves the previous dataset fully intact.
        let catalog = self.api.catalog().await?;
        let metadata = derive_filter_metadata(&catalog);
        let metadata_json = serde_json::to_string(&metadata)?;
        let dataset = Dataset {
            problems: catalog.problems,
            contests: catalog.contests,
            sheets: catalog.sheets,
            sheet_problems: catalog.sheet_problems,
        };
        log::info!(
            "catalog fetched: {} problems, {} contests, {} sheets",
            dataset.problems.len(),
            dataset.contests.len(),
            dataset.sheets.len()
        );

        self.db
            .writer()
            .call(move |conn| {
                repository::replace_catalog(conn, &dataset)?;
                repository::set_config(conn, CONFIG_FILTER_METADATA, &metadata_json)
            })
            .await?;

        // Best-effort enrichment; never fails the refresh.
        if let Some(handle) = self.configured_handle().await? {
            match self.merge_user_verdicts(&handle).await {
                Ok(merged) => log::debug!("merged {merged} verdicts for {handle}"),
                Err(e) => log::warn!("verdict merge for {handle} failed: {e}"),
            }
        }

        Ok(())
    }
}

/// Sorted, deduplicated filter vocabularies. The endpoint-provided lists
/// are unioned with values derived from the rows themselves, so a catalog
/// that omits the summary arrays still yields usable filters.
pub(crate) fn derive_filter_metadata(catalog: &CatalogResponse) -> FilterMetadata {
    let mut contest_types: BTreeSet<String> = catalog.contest_types.iter().cloned().collect();
    contest_types.extend(
        catalog
            .contests
            .iter()
            .filter(|c| !c.kind.is_empty())
            .map(|c| c.kind.clone()),
    );

    let sheet_names: BTreeSet<String> = catalog.sheets.iter().map(|s| s.name.clone()).collect();

    let mut problem_tags: BTreeSet<String> = catalog.tags.iter().cloned().collect();
    problem_tags.extend(catalog.problems.iter().flat_map(|p| p.tags.iter().cloned()));

    FilterMetadata {
        contest_types: contest_types.into_iter().collect(),
        sheet_names: sheet_names.into_iter().collect(),
        problem_tags: problem_tags.into_iter().collect(),
    }
}

/// Last-known verdict per problem key. Submissions arrive newest-first,
/// so the first verdict seen wins, except that an `OK` anywhere in the
/// history dominates any other verdict for the same key.
pub(crate) fn last_verdicts(submissions: &[Submission]) -> HashMap<(i64, String), String> {
    let mut out: HashMap<(i64, String), String> = HashMap::new();
    for s in submissions {
        let Some(contest_id) = s.contest_id else {
            continue;
        };
        let Some(verdict) = s.verdict.as_deref() else {
            continue;
        };
        let key = (contest_id, s.problem.index.clone());
        match out.get(&key) {
            None => {
                out.insert(key, verdict.to_string());
            }
            Some(existing) if existing != "OK" && verdict == "OK" => {
                out.insert(key, verdict.to_string());
            }
            Some(_) => {}
        }
    }
    out
}
