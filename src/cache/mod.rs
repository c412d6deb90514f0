use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{repository, Database};

/// A stored cache value plus its write time in epoch milliseconds.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp_ms: i64,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis((now_ms - self.timestamp_ms).max(0) as u64)
    }
}

/// Generic TTL key→value store over the `cache_entries` table.
///
/// Expired entries are not evicted on read; they stay available as a
/// degraded fallback when a refresh fails (availability over freshness).
/// Eviction happens only through [`CacheStore::clear_expired`].
#[derive(Clone)]
pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get<T>(&self, key: &str) -> Result<Option<CacheEntry<T>>>
    where
        T: DeserializeOwned,
    {
        let key = key.to_string();
        let row = self
            .db
            .reader()
            .call(move |conn| repository::get_cache_entry(conn, &key))
            .await?;
        match row {
            Some((data, timestamp_ms)) => Ok(Some(CacheEntry {
                data: serde_json::from_str(&data)?,
                timestamp_ms,
            })),
            None => Ok(None),
        }
    }

    pub async fn set<T>(&self, key: &str, data: &T) -> Result<()>
    where
        T: Serialize,
    {
        let key = key.to_string();
        let body = serde_json::to_string(data)?;
        let timestamp_ms = now_ms();
        self.db
            .writer()
            .call(move |conn| repository::set_cache_entry(conn, &key, &body, timestamp_ms))
            .await?;
        Ok(())
    }

    /// Return cached data younger than `ttl` without fetching; otherwise
    /// fetch, store, and return the fresh value. When the fetch fails and
    /// any entry exists (however old), serve the stale data instead of
    /// surfacing the failure.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // An entry that no longer decodes as T (corrupt, or the stored
        // shape changed) counts as a miss: refetching overwrites it.
        let existing = match self.get::<T>(key).await {
            Ok(entry) => entry,
            Err(Error::MalformedResponse(e)) => {
                log::warn!("discarding unreadable cache entry {key}: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(entry) = existing {
            if entry.age(now_ms()) < ttl {
                log::debug!("cache hit for {key}");
                return Ok(entry.data);
            }
            match fetch().await {
                Ok(fresh) => {
                    self.set(key, &fresh).await?;
                    Ok(fresh)
                }
                Err(e) => {
                    log::warn!("fetch for cache key {key} failed, serving stale data: {e}");
                    Ok(entry.data)
                }
            }
        } else {
            let fresh = fetch().await?;
            self.set(key, &fresh).await?;
            Ok(fresh)
        }
    }

    /// Bulk expiry sweep: delete every entry older than `ttl`. Does not
    /// change the read-path fallback behavior above.
    pub async fn clear_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff_ms = now_ms() - ttl.as_millis() as i64;
        let removed = self
            .db
            .writer()
            .call(move |conn| repository::delete_expired_cache(conn, cutoff_ms))
            .await?;
        Ok(removed)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
