use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::types::{RatingChange, Submission};
use crate::api::CfApi;
use crate::cache::CacheStore;
use crate::error::Result;

/// Freshness window for per-user API data.
pub const USER_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One user's rating-change history plus submission history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub rating_history: Vec<RatingChange>,
    pub submissions: Vec<Submission>,
}

/// Fetches per-user history through the cache store. Both halves share
/// the 24 h TTL but are cached independently, so a failure refreshing one
/// can still fall back to its stale copy while the other refreshes.
#[derive(Clone)]
pub struct UserDataService {
    api: Arc<CfApi>,
    cache: CacheStore,
}

impl UserDataService {
    pub fn new(api: Arc<CfApi>, cache: CacheStore) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Fetch rating history and submissions for `handle`. The two lookups
    /// run concurrently; the combined result is returned once both
    /// resolve.
    pub async fn get_user_data(&self, handle: &str) -> Result<UserData> {
        let rating_key = format!("rating_{handle}");
        let submissions_key = format!("submissions_{handle}");

        let (rating_history, submissions) = tokio::join!(
            self.cache.get_or_fetch(&rating_key, USER_DATA_TTL, || async {
                self.api.user_rating(handle).await
            }),
            self.cache
                .get_or_fetch(&submissions_key, USER_DATA_TTL, || async {
                    self.api.user_status(handle).await
                }),
        );

        Ok(UserData {
            rating_history: rating_history?,
            submissions: submissions?,
        })
    }
}
