pub mod fetcher;
pub mod service;

pub use fetcher::DatasetFetcher;
pub use service::{ClientId, SyncService};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::types::{Dataset, RatingChange, Submission};
use crate::error::Result;

/// Durable marker set after the first successful refresh. A fresh boot
/// that finds it trusts the stored catalog instead of refetching.
pub const CONFIG_DATA_READY: &str = "data_ready";

/// Handle whose verdicts are merged onto the catalog during refresh.
pub const CONFIG_USER_HANDLE: &str = "user_handle";

/// Optional app_config override for the catalog endpoint.
pub const CONFIG_CATALOG_URL: &str = "catalog_url";

/// Lifecycle of the shared dataset. Exactly one instance exists per
/// process, owned by the [`SyncService`].
///
/// `Initial → Fetching → Ready`, or `Fetching → Error`; from `Ready` or
/// `Error` a new refresh re-enters `Fetching`. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Initial,
    Fetching,
    Ready,
    Error,
}

/// The operation behind a dataset refresh, injectable so the service's
/// state machine is testable without a remote endpoint.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Requests a connected client may send over its channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    GetData,
    FetchUserData { handle: String },
    /// Manual refresh trigger; answered only after the refresh settles.
    Refresh,
}

/// Messages the service pushes to clients or returns for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    State {
        state: SyncState,
    },
    DataResponse {
        payload: Dataset,
    },
    UserDataResponse {
        success: bool,
        rating: Option<Vec<RatingChange>>,
        submissions: Option<Vec<Submission>>,
        error: Option<String>,
    },
    RefreshComplete {
        state: SyncState,
    },
    Failure {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&SyncState::Fetching).unwrap(),
            "\"FETCHING\""
        );
    }

    #[test]
    fn client_request_tags_are_kebab_case() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"fetch-user-data","handle":"tourist"}"#).unwrap();
        match req {
            ClientRequest::FetchUserData { handle } => assert_eq!(handle, "tourist"),
            other => panic!("unexpected request {other:?}"),
        }

        let unknown = serde_json::from_str::<ClientRequest>(r#"{"type":"bookmark-add"}"#);
        assert!(unknown.is_err());
    }
}
