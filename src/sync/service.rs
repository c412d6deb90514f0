use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::api::types::Dataset;
use crate::error::Result;
use crate::storage::{repository, Database};
use crate::sync::{ClientRequest, Refresher, ServerMessage, SyncState, CONFIG_DATA_READY};
use crate::userdata::UserDataService;

/// Recurring refresh cadence.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay before the first scheduled refresh after arming the timer.
pub const SCHEDULER_INITIAL_DELAY: Duration = Duration::from_secs(60);

pub type ClientId = u64;

/// Singleton background service owning the sync state machine and the
/// registry of connected client channels.
///
/// The state lives in a `watch` channel: `send_if_modified` gives the
/// atomic check-and-set that keeps at most one refresh in flight, and
/// `wait_for` lets the manual trigger answer only after a refresh settles.
pub struct SyncService {
    db: Database,
    fetcher: Arc<dyn Refresher>,
    users: UserDataService,
    state_tx: watch::Sender<SyncState>,
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<ServerMessage>>>,
    next_client_id: AtomicU64,
}

impl SyncService {
    pub fn new(db: Database, fetcher: Arc<dyn Refresher>, users: UserDataService) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SyncState::Initial);
        Arc::new(Self {
            db,
            fetcher,
            users,
            state_tx,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Register a new client channel. The current state is delivered
    /// immediately; a connection arriving while `Initial` kicks off a
    /// lazy-bootstrap refresh in the background.
    pub fn connect(self: &Arc<Self>) -> (ClientId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let state = self.state();
        let _ = tx.send(ServerMessage::State { state });
        self.clients.lock().unwrap().insert(id, tx);
        log::debug!("client {id} connected in state {state:?}");

        if state == SyncState::Initial {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service.refresh().await;
            });
        }
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        self.clients.lock().unwrap().remove(&id);
        log::debug!("client {id} disconnected");
    }

    /// Deliver a message to every registered channel. A send to a channel
    /// whose receiver is gone prunes that client; it never aborts the loop.
    fn broadcast(&self, message: &ServerMessage) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|id, tx| {
            if tx.send(message.clone()).is_err() {
                log::debug!("pruning dead client channel {id}");
                false
            } else {
                true
            }
        });
    }

    /// Atomically enter `Fetching`. Returns false when a refresh is
    /// already in flight.
    fn begin_refresh(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == SyncState::Fetching {
                false
            } else {
                *state = SyncState::Fetching;
                true
            }
        })
    }

    fn transition(&self, next: SyncState) {
        self.state_tx.send_if_modified(|state| {
            *state = next;
            true
        });
        self.broadcast(&ServerMessage::State { state: next });
    }

    /// Run one dataset refresh. A trigger while `Fetching` is a no-op
    /// that reports `Fetching` back without a second remote call.
    pub async fn refresh(&self) -> SyncState {
        if !self.begin_refresh() {
            log::debug!("refresh already in flight, ignoring trigger");
            return SyncState::Fetching;
        }
        self.broadcast(&ServerMessage::State {
            state: SyncState::Fetching,
        });

        let next = match self.fetcher.refresh().await {
            Ok(()) => {
                if let Err(e) = self.mark_data_ready().await {
                    log::warn!("could not persist data_ready marker: {e}");
                }
                SyncState::Ready
            }
            Err(e) => {
                log::error!("dataset refresh failed: {e}");
                SyncState::Error
            }
        };
        self.transition(next);
        next
    }

    /// Like [`refresh`](Self::refresh), but when another refresh is in
    /// flight this waits for it to settle instead of returning `Fetching`.
    pub async fn refresh_and_wait(&self) -> SyncState {
        let state = self.refresh().await;
        if state != SyncState::Fetching {
            return state;
        }
        let mut rx = self.state_tx.subscribe();
        let settled = match rx.wait_for(|s| *s != SyncState::Fetching).await {
            Ok(settled) => *settled,
            Err(_) => self.state(),
        };
        settled
    }

    /// Process-startup hook: trust the stored catalog when the durable
    /// marker is present, otherwise refresh immediately.
    pub async fn bootstrap(&self) -> Result<SyncState> {
        let marker = self
            .db
            .reader()
            .call(|conn| repository::get_config(conn, CONFIG_DATA_READY))
            .await?;
        if marker.as_deref() == Some("1") {
            let promoted = self.state_tx.send_if_modified(|state| {
                if *state == SyncState::Initial {
                    *state = SyncState::Ready;
                    true
                } else {
                    false
                }
            });
            if promoted {
                self.broadcast(&ServerMessage::State {
                    state: SyncState::Ready,
                });
            }
            Ok(self.state())
        } else {
            Ok(self.refresh().await)
        }
    }

    /// Arm the recurring refresh timer and run forever.
    pub async fn run_scheduler(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + SCHEDULER_INITIAL_DELAY;
        let mut ticker = tokio::time::interval_at(start, REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            log::info!("scheduled dataset refresh");
            self.refresh().await;
        }
    }

    /// Read the durable catalog. Valid in any state; callers wanting the
    /// freshest result should wait for `Ready` first.
    pub async fn dataset(&self) -> Result<Dataset> {
        let dataset = self
            .db
            .reader()
            .call(|conn| repository::load_dataset(conn))
            .await?;
        Ok(dataset)
    }

    /// Dispatch one client request. Unknown shapes are unrepresentable:
    /// [`ClientRequest`] is a closed tagged enum.
    pub async fn handle_request(&self, request: ClientRequest) -> ServerMessage {
        match request {
            ClientRequest::GetData => match self.dataset().await {
                Ok(payload) => ServerMessage::DataResponse { payload },
                Err(e) => ServerMessage::Failure {
                    error: e.to_string(),
                },
            },
            ClientRequest::FetchUserData { handle } => {
                match self.users.get_user_data(&handle).await {
                    Ok(data) => ServerMessage::UserDataResponse {
                        success: true,
                        rating: Some(data.rating_history),
                        submissions: Some(data.submissions),
                        error: None,
                    },
                    Err(e) => ServerMessage::UserDataResponse {
                        success: false,
                        rating: None,
                        submissions: None,
                        error: Some(e.to_string()),
                    },
                }
            }
            ClientRequest::Refresh => {
                let state = self.refresh_and_wait().await;
                ServerMessage::RefreshComplete { state }
            }
        }
    }

    async fn mark_data_ready(&self) -> Result<()> {
        self.db
            .writer()
            .call(|conn| repository::set_config(conn, CONFIG_DATA_READY, "1"))
            .await?;
        Ok(())
    }
}
