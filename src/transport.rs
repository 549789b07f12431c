use crate::error::{ErrorCode, PageError, TransportError, WireError};
use crate::model::{BirdRecord, MediaAsset, SpeciesKey};
use crate::orchestrator::FetchOrchestrator;
use crate::retry::RetryPolicy;
use crate::settings::SettingsStore;
use crate::store::ViewHistory;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A request that produces no response within this window counts as a
/// transport failure.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed delay before the single transport-level retry.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetCurrentBird,
    ResolveVideoForSpecies { species: SpeciesKey },
    ResolveAudioForSpecies { species: SpeciesKey },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Response {
    Bird { record: BirdRecord },
    Media { asset: MediaAsset },
    Error { error: WireError },
}

pub type Envelope = (Request, oneshot::Sender<Response>);

/// The privileged background side: owns the orchestrator and the settings,
/// serves requests sequentially off its channel.
pub struct BackgroundService {
    orchestrator: FetchOrchestrator,
    settings: SettingsStore,
}

impl BackgroundService {
    pub fn new(orchestrator: FetchOrchestrator, settings: SettingsStore) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetCurrentBird => {
                let prefs = match self.settings.load().await {
                    Ok(prefs) => prefs,
                    Err(err) => {
                        return Response::Error {
                            error: WireError {
                                code: ErrorCode::Provider,
                                message: format!("failed to load preferences: {err:#}"),
                            },
                        };
                    }
                };
                match self
                    .orchestrator
                    .get_current_bird(prefs.region, prefs.photo_backend, prefs.video_mode)
                    .await
                {
                    Ok(record) => Response::Bird { record },
                    Err(err) => Response::Error {
                        error: WireError::from(&err),
                    },
                }
            }
            Request::ResolveVideoForSpecies { species } => {
                match self.orchestrator.resolve_video(&species).await {
                    Ok(asset) => Response::Media { asset },
                    Err(err) => Response::Error {
                        error: WireError::from(&err),
                    },
                }
            }
            Request::ResolveAudioForSpecies { species } => {
                match self.orchestrator.resolve_audio(&species).await {
                    Ok(asset) => Response::Media { asset },
                    Err(err) => Response::Error {
                        error: WireError::from(&err),
                    },
                }
            }
        }
    }

    /// Runs the service until every client handle is dropped. The host may
    /// tear this task down between messages; clients treat the resulting
    /// silence as a retryable transport condition.
    pub async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        info!("background service started");
        while let Some((request, reply)) = rx.recv().await {
            let response = self.handle(request).await;
            if reply.send(response).is_err() {
                debug!("caller went away before the response was ready");
            }
        }
        info!("background service stopped");
    }
}

pub fn spawn_background(service: BackgroundService) -> (TransportClient, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(service.run(rx));
    (TransportClient::new(tx), handle)
}

/// Foreground handle. Transport-level failures (unreachable background,
/// response timeout) are retried exactly once after a fixed delay;
/// data-level errors inside a `Response` pass through untouched.
#[derive(Clone)]
pub struct TransportClient {
    tx: mpsc::Sender<Envelope>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl TransportClient {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            tx,
            request_timeout: REQUEST_TIMEOUT,
            retry: RetryPolicy::new(2, RETRY_DELAY),
        }
    }

    pub async fn get_current_bird(&self) -> Result<BirdRecord, TransportError> {
        match self.request(Request::GetCurrentBird).await? {
            Response::Bird { record } => Ok(record),
            Response::Error { error } => Err(TransportError::Remote(error)),
            Response::Media { .. } => Err(unexpected_response("getCurrentBird")),
        }
    }

    pub async fn resolve_video(&self, species: SpeciesKey) -> Result<MediaAsset, TransportError> {
        self.resolve_media(Request::ResolveVideoForSpecies { species })
            .await
    }

    pub async fn resolve_audio(&self, species: SpeciesKey) -> Result<MediaAsset, TransportError> {
        self.resolve_media(Request::ResolveAudioForSpecies { species })
            .await
    }

    async fn resolve_media(&self, request: Request) -> Result<MediaAsset, TransportError> {
        match self.request(request).await? {
            Response::Media { asset } => Ok(asset),
            Response::Error { error } => Err(TransportError::Remote(error)),
            Response::Bird { .. } => Err(unexpected_response("resolve media")),
        }
    }

    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        self.retry
            .run(|attempt| {
                let request = request.clone();
                async move {
                    if attempt > 1 {
                        warn!(?request, "retrying after transport failure");
                    }
                    self.request_once(request).await
                }
            })
            .await
    }

    async fn request_once(&self, request: Request) -> Result<Response, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| TransportError::Unavailable)?;

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Unavailable),
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }
}

fn unexpected_response(operation: &str) -> TransportError {
    TransportError::Remote(WireError {
        code: ErrorCode::Provider,
        message: format!("unexpected response shape for {operation}"),
    })
}

/// What the new-tab page renders: either today's live record or the newest
/// history entry standing in for it.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentBird {
    Live(BirdRecord),
    Stale(BirdRecord),
}

impl CurrentBird {
    pub fn record(&self) -> &BirdRecord {
        match self {
            CurrentBird::Live(record) | CurrentBird::Stale(record) => record,
        }
    }
}

/// Foreground facade: asks the transport for the current bird and applies
/// the history-fallback policy: stale data beats an error screen.
pub struct Frontend {
    client: TransportClient,
    history: ViewHistory,
}

impl Frontend {
    pub fn new(client: TransportClient, history: ViewHistory) -> Self {
        Self { client, history }
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    pub async fn current_bird(&self) -> Result<CurrentBird, PageError> {
        let fetch_err = match self.client.get_current_bird().await {
            Ok(record) => return Ok(CurrentBird::Live(record)),
            Err(err) => err,
        };

        // Any failure, data- or transport-level, falls back to the newest
        // history entry; the substitute is not re-appended.
        match self.history.newest().await {
            Ok(Some(entry)) => {
                warn!("live fetch failed, showing last seen bird: {fetch_err}");
                Ok(CurrentBird::Stale(entry.record))
            }
            Ok(None) => Err(classify_empty_fallback(&fetch_err)),
            Err(store_err) => {
                warn!("history unreadable during fallback: {store_err:#}");
                Err(classify_empty_fallback(&fetch_err))
            }
        }
    }
}

fn classify_empty_fallback(err: &TransportError) -> PageError {
    match err {
        TransportError::Remote(wire) => match wire.code {
            ErrorCode::NoSighting => PageError::NoSighting,
            ErrorCode::MediaUnavailable => PageError::MediaUnavailable,
            _ => PageError::NetworkErrorNoCache,
        },
        _ => PageError::NetworkErrorNoCache,
    }
}
