pub mod api;
pub mod cache;
pub mod error;
pub mod storage;
pub mod summary;
pub mod sync;
pub mod userdata;

pub use api::CfApi;
pub use cache::CacheStore;
pub use error::{Error, Result};
pub use storage::Database;
pub use summary::{Selection, SelectionMode, SummaryEngine, SummaryReport};
pub use sync::{
    ClientRequest, Refresher, ServerMessage, SyncService, SyncState, CONFIG_CATALOG_URL,
    CONFIG_USER_HANDLE,
};
pub use userdata::{UserData, UserDataService};

use std::sync::Arc;

use api::types::FilterMetadata;
use storage::repository;
use sync::fetcher::{DatasetFetcher, CONFIG_FILTER_METADATA};

/// Main entry point for the Codeforces statistics warehouse.
pub struct CfStats {
    db: Database,
    api: Arc<CfApi>,
}

impl CfStats {
    pub fn new(db: Database, api: CfApi) -> Self {
        Self {
            db,
            api: Arc::new(api),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    fn user_data_service(&self) -> UserDataService {
        UserDataService::new(Arc::clone(&self.api), CacheStore::new(self.db.clone()))
    }

    /// Assemble the background sync service over this instance's store
    /// and API client.
    pub fn sync_service(&self) -> Arc<SyncService> {
        let fetcher = Arc::new(DatasetFetcher::new(self.db.clone(), Arc::clone(&self.api)));
        SyncService::new(self.db.clone(), fetcher, self.user_data_service())
    }

    /// Run one catalog refresh in the foreground, outside the sync
    /// service's state machine.
    pub async fn refresh_dataset(&self) -> Result<()> {
        DatasetFetcher::new(self.db.clone(), Arc::clone(&self.api))
            .refresh()
            .await
    }

    /// Cached-or-fetched rating history and submissions for `handle`.
    pub async fn user_data(&self, handle: &str) -> Result<UserData> {
        self.user_data_service().get_user_data(handle).await
    }

    /// Compute the per-division summary report for `handle` over the
    /// stored catalog.
    pub async fn summarize(&self, handle: &str, selection: &Selection) -> Result<SummaryReport> {
        let dataset = self
            .db
            .reader()
            .call(|conn| repository::load_dataset(conn))
            .await?;
        let data = self.user_data(handle).await?;
        let source: Arc<dyn summary::ContestMetaSource> = self.api.clone();
        let engine = SummaryEngine::new(source);
        engine
            .compute_summaries(&dataset, &data.rating_history, &data.submissions, selection)
            .await
    }

    /// The filter vocabularies derived during the last catalog refresh,
    /// if any refresh has completed.
    pub async fn filter_metadata(&self) -> Result<Option<FilterMetadata>> {
        let raw = self
            .db
            .reader()
            .call(|conn| repository::get_config(conn, CONFIG_FILTER_METADATA))
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Delete cache entries older than `ttl`. Returns how many were
    /// removed.
    pub async fn sweep_cache(&self, ttl: std::time::Duration) -> Result<usize> {
        CacheStore::new(self.db.clone()).clear_expired(ttl).await
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await?;
        Ok(value)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await?;
        Ok(())
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        let entries = self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Ok(entries)
    }

    /// Read-only accessor for the configured default handle.
    pub async fn user_handle(&self) -> Result<Option<String>> {
        self.config_get(CONFIG_USER_HANDLE).await
    }
}
