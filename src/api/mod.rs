pub mod types;

pub use types::*;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::summary::ContestMetaSource;

pub const DEFAULT_API_BASE: &str = "https://codeforces.com/api";
pub const DEFAULT_CATALOG_URL: &str = "https://cfstats-catalog.fly.dev/api/catalog";

/// Number of submissions requested per `user.status` call. The API returns
/// them newest-first; one page this large covers any realistic account.
const SUBMISSION_PAGE: u32 = 10_000;

/// Response envelope shared by every Codeforces API method. A non-"OK"
/// status is an application-level failure even when HTTP says 200.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: String,
    pub result: Option<T>,
    pub comment: Option<String>,
}

pub(crate) fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T> {
    if envelope.status != "OK" {
        return Err(Error::RemoteApi(
            envelope
                .comment
                .unwrap_or_else(|| format!("status {}", envelope.status)),
        ));
    }
    envelope
        .result
        .ok_or_else(|| Error::MalformedResponse("OK envelope without result".into()))
}

/// HTTP client for the catalog endpoint and the Codeforces API.
#[derive(Clone)]
pub struct CfApi {
    http: reqwest::Client,
    api_base: String,
    catalog_url: String,
}

impl CfApi {
    pub fn new() -> Self {
        Self::with_urls(DEFAULT_API_BASE, DEFAULT_CATALOG_URL)
    }

    pub fn with_urls(api_base: impl Into<String>, catalog_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            catalog_url: catalog_url.into(),
        }
    }

    /// Fetch the shared catalog. Non-2xx or a malformed body is an error;
    /// the caller must not have mutated any durable state yet.
    pub async fn catalog(&self) -> Result<CatalogResponse> {
        let resp = self.http.get(&self.catalog_url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "catalog endpoint returned {}",
                resp.status()
            )));
        }
        Ok(resp.json::<CatalogResponse>().await?)
    }

    pub async fn user_rating(&self, handle: &str) -> Result<Vec<RatingChange>> {
        self.api_call("user.rating", &[("handle", handle)]).await
    }

    pub async fn user_status(&self, handle: &str) -> Result<Vec<Submission>> {
        let count = SUBMISSION_PAGE.to_string();
        self.api_call(
            "user.status",
            &[("handle", handle), ("from", "1"), ("count", &count)],
        )
        .await
    }

    pub async fn contest_list(&self) -> Result<Vec<ContestListEntry>> {
        self.api_call("contest.list", &[]).await
    }

    /// Read the full problem index list of one contest from its standings
    /// page, requesting a single row to keep the payload small.
    pub async fn contest_problem_indexes(&self, contest_id: i64) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Standings {
            #[serde(default)]
            problems: Vec<StandingsProblem>,
        }
        #[derive(Deserialize)]
        struct StandingsProblem {
            index: String,
        }

        let id = contest_id.to_string();
        let standings: Standings = self
            .api_call(
                "contest.standings",
                &[("contestId", id.as_str()), ("from", "1"), ("count", "1")],
            )
            .await?;
        Ok(standings.problems.into_iter().map(|p| p.index).collect())
    }

    async fn api_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{method}", self.api_base);
        let resp = self.http.get(&url).query(params).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "{method} returned {}",
                resp.status()
            )));
        }
        let envelope = resp.json::<ApiEnvelope<T>>().await?;
        unwrap_envelope(envelope)
    }
}

impl Default for CfApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContestMetaSource for CfApi {
    async fn contest_list(&self) -> Result<Vec<ContestListEntry>> {
        CfApi::contest_list(self).await
    }

    async fn contest_problem_indexes(&self, contest_id: i64) -> Result<Vec<String>> {
        CfApi::contest_problem_indexes(self, contest_id).await
    }
}
