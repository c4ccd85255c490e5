use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::app_state::AppError;
use crate::config;
use crate::db::{Db, DbContent};
use crate::events::{EventBus, EventKind, EventPayload};
use crate::request_client::UpstreamClient;

/// The slice of a media server the core relies on.
#[async_trait::async_trait]
pub trait MediaServerClient: Send + Sync {
    /// Look an item up by external guid, e.g. `imdb://tt0133093`. Returns
    /// the server's opaque key when the item is indexed.
    async fn find_by_guid(&self, guid: &str) -> Result<Option<String>, AppError>;

    async fn sections(&self) -> Result<Vec<PlexSection>, AppError>;

    async fn refresh_section(&self, key: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct PlexSection {
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Plex HTTP API client.
#[derive(Debug, Clone)]
pub struct PlexApi {
    base_url: Url,
    token: String,
    client: UpstreamClient,
}

impl PlexApi {
    pub fn new(base_url: Url, token: String, deadline: Duration) -> Self {
        let client = UpstreamClient::new(Client::new(), 4, Duration::from_millis(250), deadline);
        Self {
            base_url,
            token,
            client,
        }
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().expect("plex url is a valid base");
            for segment in segments {
                path.push(segment);
            }
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("X-Plex-Token", &self.token);
        }
        url
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let mut request = Request::new(Method::GET, self.url(segments, query));
        request
            .headers_mut()
            .insert("Accept", "application/json".parse().expect("valid header"));
        self.client.json(request).await
    }
}

#[async_trait::async_trait]
impl MediaServerClient for PlexApi {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<String>, AppError> {
        let response: PlexEnvelope<PlexMetadataContainer> = self
            .get(&["library", "all"], &[("guid", guid)])
            .await?;
        Ok(response
            .media_container
            .metadata
            .into_iter()
            .next()
            .map(|m| m.rating_key))
    }

    async fn sections(&self) -> Result<Vec<PlexSection>, AppError> {
        let response: PlexEnvelope<PlexDirectoryContainer> =
            self.get(&["library", "sections"], &[]).await?;
        Ok(response.media_container.directory)
    }

    async fn refresh_section(&self, key: &str) -> Result<(), AppError> {
        let request = Request::new(
            Method::GET,
            self.url(&["library", "sections", key, "refresh"], &[]),
        );
        self.client.request(request).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PlexEnvelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
struct PlexMetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
}

#[derive(Debug, Deserialize)]
struct PlexDirectoryContainer {
    #[serde(rename = "Directory", default)]
    directory: Vec<PlexSection>,
}

#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub content_id: i64,
    pub download_id: i64,
    pub file_path: String,
    pub added_at: OffsetDateTime,
}

/// Watches imports until the media server actually indexes them.
///
/// Every `ImportCompleted` queues a pending verification keyed by content
/// id; periodic ticks poll the server until the item shows up or the record
/// ages out.
pub struct PlexVerifier {
    db: Db,
    server: Arc<dyn MediaServerClient>,
    events: &'static EventBus,
    pending: Mutex<HashMap<i64, PendingVerification>>,
}

impl PlexVerifier {
    pub fn new(db: Db, server: Arc<dyn MediaServerClient>, events: &'static EventBus) -> Self {
        Self {
            db,
            server,
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending(&self) -> Vec<PendingVerification> {
        self.pending.lock().unwrap().values().cloned().collect()
    }

    /// Re-announcing an already-pending content refreshes the target file
    /// but keeps the original deadline.
    pub fn track(&self, content_id: i64, download_id: i64, file_path: String) {
        let mut pending = self.pending.lock().unwrap();
        match pending.get_mut(&content_id) {
            Some(existing) => {
                existing.download_id = download_id;
                existing.file_path = file_path;
            }
            None => {
                pending.insert(
                    content_id,
                    PendingVerification {
                        content_id,
                        download_id,
                        file_path,
                        added_at: OffsetDateTime::now_utc(),
                    },
                );
            }
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        let minutes = config::CONFIG
            .get_value::<config::PlexVerifyIntervalMinutes>()
            .0;
        let mut interval =
            tokio::time::interval(Duration::from_secs(minutes.max(1) * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut rx = self.events.subscribe(&[EventKind::ImportCompleted], 64);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let EventPayload::ImportCompleted { download_id, content_id, file_path } = event.payload {
                        self.track(content_id, download_id, file_path);
                    }
                }
                _ = interval.tick() => self.tick().await,
            }
        }
        tracing::info!("Plex verifier stopped");
    }

    /// One verification pass. Errors keep the record pending; only a clear
    /// answer or the timeout resolves it.
    pub async fn tick(&self) {
        let timeout_hours = config::CONFIG.get_value::<config::PlexVerifyTimeoutHours>().0;
        let deadline = time::Duration::hours(timeout_hours as i64);
        let snapshot = self.pending();
        for entry in snapshot {
            let content = match self.db.content(entry.content_id).await {
                Ok(content) => content,
                Err(_) => {
                    // Content got deleted while we were waiting.
                    self.pending.lock().unwrap().remove(&entry.content_id);
                    continue;
                }
            };
            match self.lookup(&content).await {
                Ok(Some(rating_key)) => {
                    tracing::info!(
                        content_id = entry.content_id,
                        rating_key,
                        "Media server picked up the import"
                    );
                    self.pending.lock().unwrap().remove(&entry.content_id);
                    self.events.publish(EventPayload::PlexItemDetected {
                        content_id: entry.content_id,
                        rating_key,
                    });
                }
                Ok(None) => {
                    if OffsetDateTime::now_utc() - entry.added_at > deadline {
                        tracing::warn!(
                            content_id = entry.content_id,
                            "Media server never indexed the import"
                        );
                        self.pending.lock().unwrap().remove(&entry.content_id);
                        self.events.publish(EventPayload::PlexVerificationTimedOut {
                            content_id: entry.content_id,
                            download_id: entry.download_id,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        content_id = entry.content_id,
                        "Media server lookup failed, will retry: {e}"
                    );
                }
            }
        }
    }

    async fn lookup(&self, content: &DbContent) -> Result<Option<String>, AppError> {
        for guid in content_guids(content) {
            if let Some(rating_key) = self.server.find_by_guid(&guid).await? {
                return Ok(Some(rating_key));
            }
        }
        Ok(None)
    }
}

fn content_guids(content: &DbContent) -> Vec<String> {
    let mut guids = Vec::new();
    if let Some(imdb) = &content.imdb_id {
        guids.push(format!("imdb://{imdb}"));
    }
    if let Some(tvdb) = content.tvdb_id {
        guids.push(format!("tvdb://{tvdb}"));
    }
    guids
}
