use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::app_state::AppError;
use crate::config;
use crate::db::{Db, DbContent, DbDownload, NewDownload, NewFile};
use crate::downloader::{ClientStatus, DownloadClient};
use crate::events::{EventBus, EventPayload};
use crate::searcher::{SearchQuery, Searcher};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Importing,
    Imported,
    Cleaned,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Cleaned | DownloadStatus::Failed)
    }

    /// States that imply the external download finished one way or another.
    pub fn requires_completed_at(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed
                | DownloadStatus::Importing
                | DownloadStatus::Imported
                | DownloadStatus::Cleaned
                | DownloadStatus::Failed
        )
    }

    /// The lifecycle edge set. Anything else is an invariant violation.
    pub fn can_transition(self, to: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, to),
            (Queued, Downloading)
                | (Downloading, Completed)
                | (Completed, Importing)
                | (Importing, Imported)
                | (Imported, Cleaned)
        ) || (to == Failed && !self.is_terminal())
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Importing => "importing",
            DownloadStatus::Imported => "imported",
            DownloadStatus::Cleaned => "cleaned",
            DownloadStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Refreshed from the downloader every tick; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct LiveStats {
    pub progress: f32,
    pub size_bytes: u64,
    pub speed_bps: u64,
    pub eta_secs: Option<u64>,
}

#[derive(Debug)]
struct LiveEntry {
    stats: LiveStats,
    last_progress_change: Instant,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DownloadView {
    #[serde(flatten)]
    pub record: DbDownload,
    pub live: Option<LiveStats>,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct GrabSpec {
    pub content_id: i64,
    pub episode_id: Option<i64>,
    pub season: Option<i64>,
    #[serde(default)]
    pub is_complete_season: bool,
    pub url: String,
    pub release_name: String,
    pub indexer: String,
}

/// Owns every `Download` state mutation. Per-download locks keep transitions
/// linearizable; the polling loop reconciles against the external client.
pub struct DownloadManager {
    db: Db,
    client: Arc<dyn DownloadClient>,
    searcher: Searcher,
    events: &'static EventBus,
    live: Mutex<HashMap<i64, LiveEntry>>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl DownloadManager {
    pub fn new(
        db: Db,
        client: Arc<dyn DownloadClient>,
        searcher: Searcher,
        events: &'static EventBus,
    ) -> Self {
        Self {
            db,
            client,
            searcher,
            events,
            live: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn download_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .clone()
    }

    /// Hand a release URL to the downloader and persist the tracked record.
    pub async fn grab(&self, spec: GrabSpec) -> Result<DbDownload, AppError> {
        let content = self.db.content(spec.content_id).await.map_err(|_| {
            AppError::bad_request(format!("content {} does not exist", spec.content_id))
        })?;
        let category = config::CONFIG.get_value::<config::SabnzbdCategory>().0;
        let submitted = self
            .client
            .submit(&spec.url, &spec.release_name, category.as_deref())
            .await?;
        if self
            .db
            .download_by_client_id(self.client.client_name(), &submitted.client_id)
            .await?
            .is_some()
        {
            return Err(AppError::duplicate(format!(
                "client id {} is already tracked",
                submitted.client_id
            )));
        }
        let id = self
            .db
            .insert_download(NewDownload {
                content_id: content.id,
                episode_id: spec.episode_id,
                season: spec.season,
                is_complete_season: spec.is_complete_season,
                client_name: self.client.client_name().to_string(),
                client_id: submitted.client_id,
                release_name: spec.release_name.clone(),
                indexer: spec.indexer.clone(),
            })
            .await?;
        let download = self.db.download(id).await?;
        self.db
            .insert_history(Some(id), Some(content.id), "grabbed", &spec.release_name)
            .await?;
        self.events.publish(EventPayload::DownloadGrabbed {
            download_id: id,
            content_id: content.id,
            release_name: spec.release_name,
            indexer: spec.indexer,
        });
        tracing::info!(
            download_id = id,
            release = download.release_name,
            "Grabbed release"
        );
        Ok(download)
    }

    pub async fn get(&self, id: i64) -> Result<DownloadView, AppError> {
        let record = self
            .db
            .download(id)
            .await
            .map_err(|_| AppError::not_found("download is not found"))?;
        Ok(DownloadView {
            live: self.live_stats(record.id),
            record,
        })
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<DownloadView>, AppError> {
        let records = self.db.downloads(active_only).await?;
        Ok(records
            .into_iter()
            .map(|record| DownloadView {
                live: self.live_stats(record.id),
                record,
            })
            .collect())
    }

    pub fn live_stats(&self, id: i64) -> Option<LiveStats> {
        self.live.lock().unwrap().get(&id).map(|e| e.stats)
    }

    /// How long a download has gone without progress movement.
    pub fn stalled_for(&self, id: i64) -> Option<Duration> {
        self.live
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.last_progress_change.elapsed())
    }

    /// Cancel is a no-op on records that already reached a terminal state.
    pub async fn cancel(&self, id: i64, delete_files: bool) -> Result<(), AppError> {
        let lock = self.download_lock(id);
        let _guard = lock.lock().await;
        let download = self
            .db
            .download(id)
            .await
            .map_err(|_| AppError::not_found("download is not found"))?;
        if download.status.is_terminal() {
            return Ok(());
        }
        self.client.cancel(&download.client_id, delete_files).await?;
        self.transition(&download, DownloadStatus::Failed).await?;
        self.db
            .insert_history(Some(id), Some(download.content_id), "canceled", "")
            .await?;
        self.events.publish(EventPayload::DownloadFailed {
            download_id: id,
            content_id: download.content_id,
            reason: "canceled".to_string(),
        });
        Ok(())
    }

    /// Search again and grab the best release that is not the one that
    /// already failed. The failed record stays failed; a fresh record comes
    /// back.
    pub async fn retry(&self, id: i64) -> Result<i64, AppError> {
        let failed = self
            .db
            .download(id)
            .await
            .map_err(|_| AppError::not_found("download is not found"))?;
        if failed.status != DownloadStatus::Failed {
            return Err(AppError::bad_request("only failed downloads can be retried"));
        }
        let content = self.db.content(failed.content_id).await?;
        let profiles = config::CONFIG.get_value::<config::QualityProfiles>();
        let profile = profiles
            .by_name(&content.quality_profile)
            .ok_or_else(|| {
                AppError::bad_request(format!(
                    "unknown quality profile {}",
                    content.quality_profile
                ))
            })?
            .clone();
        let query = retry_query(&content, &failed);
        let outcome = self.searcher.search(&query, &profile).await?;
        let replacement = outcome
            .releases
            .into_iter()
            .find(|r| r.score > 0 && r.release.title != failed.release_name)
            .ok_or_else(|| AppError::not_found("no alternative release found"))?;
        self.db
            .insert_history(Some(id), Some(content.id), "retried", &replacement.release.title)
            .await?;
        let download = self
            .grab(GrabSpec {
                content_id: content.id,
                episode_id: failed.episode_id,
                season: failed.season,
                is_complete_season: failed.is_complete_season,
                url: replacement.release.download_url.clone(),
                release_name: replacement.release.title.clone(),
                indexer: replacement.release.indexer.clone(),
            })
            .await?;
        Ok(download.id)
    }

    /// Importer-facing: claim a completed record for import.
    pub async fn begin_import(&self, id: i64) -> Result<DbDownload, AppError> {
        let lock = self.download_lock(id);
        let _guard = lock.lock().await;
        let download = self.db.download(id).await?;
        self.transition(&download, DownloadStatus::Importing).await?;
        self.events.publish(EventPayload::ImportStarted {
            download_id: id,
            content_id: download.content_id,
        });
        self.db.download(id).await.map_err(Into::into)
    }

    /// Importer-facing: the files landed, write everything in one
    /// transaction and announce the import.
    pub async fn finish_import(&self, id: i64, files: Vec<NewFile>) -> Result<Vec<i64>, AppError> {
        if files.is_empty() {
            return Err(AppError::internal_error("import produced no files"));
        }
        let lock = self.download_lock(id);
        let _guard = lock.lock().await;
        let download = self.db.download(id).await?;
        if !download.status.can_transition(DownloadStatus::Imported) {
            return Err(invalid_transition(&download, DownloadStatus::Imported));
        }
        let content_id = download.content_id;
        let file_path = files[0].path.clone();
        let file_ids = self
            .db
            .record_import(files, id, download.completed_at)
            .await?;
        self.events.publish(EventPayload::ImportCompleted {
            download_id: id,
            content_id,
            file_path,
        });
        Ok(file_ids)
    }

    /// Importer-facing: the import blew up; the record is failed for good.
    pub async fn fail_import(&self, id: i64, reason: &str) -> Result<(), AppError> {
        let lock = self.download_lock(id);
        let _guard = lock.lock().await;
        let download = self.db.download(id).await?;
        self.transition(&download, DownloadStatus::Failed).await?;
        self.db
            .insert_history(Some(id), Some(download.content_id), "import_failed", reason)
            .await?;
        self.events.publish(EventPayload::ImportFailed {
            download_id: id,
            content_id: download.content_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn transition(&self, download: &DbDownload, to: DownloadStatus) -> Result<(), AppError> {
        if !download.status.can_transition(to) {
            return Err(invalid_transition(download, to));
        }
        let completed_at = if to.requires_completed_at() {
            download.completed_at.or_else(|| Some(OffsetDateTime::now_utc()))
        } else {
            None
        };
        self.db
            .update_download_status(download.id, to, completed_at)
            .await?;
        if to.is_terminal() {
            self.live.lock().unwrap().remove(&download.id);
        }
        tracing::debug!(
            download_id = download.id,
            from = %download.status,
            to = %to,
            "Download state transition"
        );
        Ok(())
    }

    /// Reconciliation loop. Ticks until the token cancels.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        let secs = config::CONFIG.get_value::<config::PollIntervalSeconds>().0;
        let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_tick().await;
                    self.cleanup_tick().await;
                }
            }
        }
        tracing::info!("Download manager stopped");
    }

    /// One reconciliation pass over every download the client still owns.
    pub async fn poll_tick(&self) {
        let downloads = match self.db.downloads(true).await {
            Ok(downloads) => downloads,
            Err(e) => {
                tracing::error!("Failed to list downloads for polling: {e}");
                return;
            }
        };
        for download in downloads {
            if !matches!(
                download.status,
                DownloadStatus::Queued | DownloadStatus::Downloading
            ) {
                continue;
            }
            if let Err(e) = self.poll_one(download).await {
                tracing::warn!("Poll error, retrying next tick: {e}");
            }
        }
    }

    async fn poll_one(&self, download: DbDownload) -> Result<(), AppError> {
        let lock = self.download_lock(download.id);
        let _guard = lock.lock().await;
        let status = match self.client.status(&download.client_id).await {
            Ok(status) => status,
            Err(e) => {
                // Transient: state is only changed by an authoritative answer.
                tracing::warn!(
                    download_id = download.id,
                    "Downloader poll failed: {e}"
                );
                return Ok(());
            }
        };
        let Some(status) = status else {
            tracing::warn!(
                download_id = download.id,
                client_id = download.client_id,
                "Downloader has no trace of this job"
            );
            return Ok(());
        };
        match status {
            ClientStatus::Queued => {}
            ClientStatus::Downloading {
                progress,
                size_bytes,
                speed_bps,
                eta,
            } => {
                if download.status == DownloadStatus::Queued {
                    self.transition(&download, DownloadStatus::Downloading).await?;
                }
                let stats = LiveStats {
                    progress,
                    size_bytes,
                    speed_bps,
                    eta_secs: eta.map(|e| e.as_secs()),
                };
                self.update_live(download.id, stats);
                self.events.publish(EventPayload::DownloadProgress {
                    download_id: download.id,
                    content_id: download.content_id,
                    progress,
                    speed_bps,
                    eta_secs: stats.eta_secs,
                });
            }
            ClientStatus::Completed { path } => {
                let mut current = download.clone();
                if current.status == DownloadStatus::Queued {
                    self.transition(&current, DownloadStatus::Downloading).await?;
                    current = self.db.download(current.id).await?;
                }
                self.transition(&current, DownloadStatus::Completed).await?;
                self.db
                    .insert_history(
                        Some(current.id),
                        Some(current.content_id),
                        "download_completed",
                        &path.to_string_lossy(),
                    )
                    .await?;
                self.events.publish(EventPayload::DownloadCompleted {
                    download_id: current.id,
                    content_id: current.content_id,
                    path: path.to_string_lossy().to_string(),
                });
            }
            ClientStatus::Failed { reason } => {
                self.transition(&download, DownloadStatus::Failed).await?;
                self.db
                    .insert_history(
                        Some(download.id),
                        Some(download.content_id),
                        "download_failed",
                        &reason,
                    )
                    .await?;
                self.events.publish(EventPayload::DownloadFailed {
                    download_id: download.id,
                    content_id: download.content_id,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Imported records past the cleanup age get their downloader-side
    /// artifacts removed and settle in `cleaned`.
    pub async fn cleanup_tick(&self) {
        let age_hours = config::CONFIG.get_value::<config::CleanupAgeHours>().0;
        let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(age_hours as i64);
        let imported = match self.db.imported_downloads_before(cutoff).await {
            Ok(imported) => imported,
            Err(e) => {
                tracing::error!("Failed to list imported downloads: {e}");
                return;
            }
        };
        for download in imported {
            let lock = self.download_lock(download.id);
            let _guard = lock.lock().await;
            if let Err(e) = self.client.cancel(&download.client_id, true).await {
                tracing::warn!(
                    download_id = download.id,
                    "Artifact cleanup failed, retrying next tick: {e}"
                );
                continue;
            }
            if let Err(e) = self.transition(&download, DownloadStatus::Cleaned).await {
                tracing::error!(download_id = download.id, "Cleanup transition failed: {e}");
                continue;
            }
            let _ = self
                .db
                .insert_history(Some(download.id), Some(download.content_id), "cleaned", "")
                .await;
        }
    }

    fn update_live(&self, id: i64, stats: LiveStats) {
        let mut live = self.live.lock().unwrap();
        match live.get_mut(&id) {
            Some(entry) => {
                if (entry.stats.progress - stats.progress).abs() > f32::EPSILON {
                    entry.last_progress_change = Instant::now();
                }
                entry.stats = stats;
            }
            None => {
                live.insert(
                    id,
                    LiveEntry {
                        stats,
                        last_progress_change: Instant::now(),
                    },
                );
            }
        }
    }
}

fn invalid_transition(download: &DbDownload, to: DownloadStatus) -> AppError {
    tracing::error!(
        download_id = download.id,
        from = %download.status,
        to = %to,
        "Refusing invalid state transition"
    );
    AppError::internal_error(format!(
        "invalid state transition {} -> {to}",
        download.status
    ))
}

fn retry_query(content: &DbContent, failed: &DbDownload) -> SearchQuery {
    let mut query = match content.content_type {
        crate::db::ContentType::Movie => {
            let text = if content.year > 0 {
                format!("{} {}", content.title, content.year)
            } else {
                content.title.clone()
            };
            SearchQuery::movie(text)
        }
        crate::db::ContentType::Series => {
            let season = failed.season.map(|s| s as u16);
            match (season, failed.episode_id) {
                (Some(season), None) => SearchQuery::series(
                    format!("{} S{season:02}", content.title),
                    Some(season),
                    None,
                ),
                _ => SearchQuery::series(content.title.clone(), season, None),
            }
        }
    };
    query.imdb_id = content.imdb_id.clone();
    query.tvdb_id = content.tvdb_id;
    query
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::db::tests::{movie_content, temp_db};
    use crate::downloader::SubmittedDownload;
    use crate::events::{EventKind, EventPayload};
    use crate::indexer::{Indexer, IndexerPool, ProspectRelease, SearchRequest};

    #[derive(Default)]
    struct MockClient {
        statuses: Mutex<HashMap<String, ClientStatus>>,
        cancels: Mutex<Vec<(String, bool)>>,
        next_id: AtomicU64,
    }

    impl MockClient {
        fn set_status(&self, client_id: &str, status: ClientStatus) {
            self.statuses
                .lock()
                .unwrap()
                .insert(client_id.to_string(), status);
        }
    }

    #[async_trait::async_trait]
    impl DownloadClient for MockClient {
        fn client_name(&self) -> &'static str {
            "mock"
        }

        async fn submit(
            &self,
            _url: &str,
            _name: &str,
            _category: Option<&str>,
        ) -> Result<SubmittedDownload, AppError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(SubmittedDownload {
                client_id: format!("nzo_{id}"),
                category: None,
            })
        }

        async fn status(&self, client_id: &str) -> Result<Option<ClientStatus>, AppError> {
            Ok(self.statuses.lock().unwrap().get(client_id).cloned())
        }

        async fn cancel(&self, client_id: &str, delete_files: bool) -> Result<(), AppError> {
            self.cancels
                .lock()
                .unwrap()
                .push((client_id.to_string(), delete_files));
            Ok(())
        }

        async fn version(&self) -> Result<String, AppError> {
            Ok("mock 1.0".to_string())
        }
    }

    struct EmptyIndexer;

    #[async_trait::async_trait]
    impl Indexer for EmptyIndexer {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError> {
            Ok(vec![ProspectRelease {
                title: "Test.Movie.2024.1080p.WEB-DL.x264-ALT".to_string(),
                guid: "alt".to_string(),
                download_url: "https://indexer.test/get/alt".to_string(),
                size: 1 << 30,
                published: None,
                indexer: "static".to_string(),
            }])
        }

        fn indexer_name(&self) -> &str {
            "static"
        }
    }

    struct Setup {
        manager: DownloadManager,
        client: Arc<MockClient>,
        events: &'static EventBus,
        content_id: i64,
    }

    async fn setup() -> Setup {
        let db = temp_db().await;
        let content_id = db.insert_content(movie_content()).await.unwrap();
        let client = Arc::new(MockClient::default());
        let events: &'static EventBus = Box::leak(Box::new(EventBus::new()));
        let searcher = Searcher::new(IndexerPool::new(
            vec![Arc::new(EmptyIndexer)],
            Duration::from_secs(5),
        ));
        let manager = DownloadManager::new(db, client.clone(), searcher, events);
        Setup {
            manager,
            client,
            events,
            content_id,
        }
    }

    fn spec(content_id: i64) -> GrabSpec {
        GrabSpec {
            content_id,
            episode_id: None,
            season: None,
            is_complete_season: false,
            url: "https://indexer.test/get/0".into(),
            release_name: "Test.Movie.2024.1080p.WEB-DL.DDP5.1.H264-X".into(),
            indexer: "nzbhub".into(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn grab_creates_queued_download() {
        let s = setup().await;
        let mut rx = s.events.subscribe(&[EventKind::DownloadGrabbed], 4);
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        assert_eq!(DownloadStatus::Queued, download.status);
        assert!(download.completed_at.is_none());
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::DownloadGrabbed { download_id, .. } if download_id == download.id
        ));
    }

    #[test_log::test(tokio::test)]
    async fn poll_walks_the_happy_path() {
        let s = setup().await;
        let mut completions = s.events.subscribe(&[EventKind::DownloadCompleted], 4);
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();

        s.client.set_status(
            &download.client_id,
            ClientStatus::Downloading {
                progress: 35.0,
                size_bytes: 1 << 30,
                speed_bps: 10 << 20,
                eta: Some(Duration::from_secs(90)),
            },
        );
        s.manager.poll_tick().await;
        let view = s.manager.get(download.id).await.unwrap();
        assert_eq!(DownloadStatus::Downloading, view.record.status);
        assert_eq!(35.0, view.live.unwrap().progress);
        assert!(view.record.completed_at.is_none());

        s.client.set_status(
            &download.client_id,
            ClientStatus::Completed {
                path: PathBuf::from("/dl/complete/Test.Movie.2024.1080p.WEB-DL.mkv"),
            },
        );
        s.manager.poll_tick().await;
        let view = s.manager.get(download.id).await.unwrap();
        assert_eq!(DownloadStatus::Completed, view.record.status);
        assert!(view.record.completed_at.is_some());

        let event = completions.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::DownloadCompleted { download_id, .. } if download_id == download.id
        ));
    }

    #[test_log::test(tokio::test)]
    async fn client_failure_is_authoritative() {
        let s = setup().await;
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        s.client.set_status(
            &download.client_id,
            ClientStatus::Failed {
                reason: "out of retention".into(),
            },
        );
        s.manager.poll_tick().await;
        let view = s.manager.get(download.id).await.unwrap();
        assert_eq!(DownloadStatus::Failed, view.record.status);
        assert!(view.record.completed_at.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn cancel_is_idempotent_on_terminal_records() {
        let s = setup().await;
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        s.manager.cancel(download.id, true).await.unwrap();
        let view = s.manager.get(download.id).await.unwrap();
        assert_eq!(DownloadStatus::Failed, view.record.status);
        assert_eq!(1, s.client.cancels.lock().unwrap().len());

        // Second cancel must not touch the client again.
        s.manager.cancel(download.id, false).await.unwrap();
        assert_eq!(1, s.client.cancels.lock().unwrap().len());
        assert_eq!(
            DownloadStatus::Failed,
            s.manager.get(download.id).await.unwrap().record.status
        );
    }

    #[test_log::test(tokio::test)]
    async fn import_requires_completed_state() {
        let s = setup().await;
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        // Still queued, claiming it for import is an invariant violation.
        assert!(s.manager.begin_import(download.id).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn retry_creates_a_new_record() {
        let s = setup().await;
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        s.manager.cancel(download.id, false).await.unwrap();

        let new_id = s.manager.retry(download.id).await.unwrap();
        assert_ne!(download.id, new_id);
        let old = s.manager.get(download.id).await.unwrap();
        let new = s.manager.get(new_id).await.unwrap();
        assert_eq!(DownloadStatus::Failed, old.record.status);
        assert_eq!(DownloadStatus::Queued, new.record.status);
        assert_ne!(old.record.release_name, new.record.release_name);
    }

    #[test_log::test(tokio::test)]
    async fn cleanup_reaches_cleaned() {
        let s = setup().await;
        let download = s.manager.grab(spec(s.content_id)).await.unwrap();
        s.client.set_status(
            &download.client_id,
            ClientStatus::Completed {
                path: PathBuf::from("/dl/complete/movie.mkv"),
            },
        );
        s.manager.poll_tick().await;
        let claimed = s.manager.begin_import(download.id).await.unwrap();
        s.manager
            .finish_import(
                claimed.id,
                vec![NewFile {
                    content_id: s.content_id,
                    episode_id: None,
                    path: "/media/movies/Test Movie (2024)/Test Movie (2024).mkv".into(),
                    size: 4096,
                    quality: "1080p".into(),
                    source: "webdl".into(),
                }],
            )
            .await
            .unwrap();

        // Age the record past the cleanup window.
        let old = OffsetDateTime::now_utc() - time::Duration::hours(48);
        s.manager
            .db
            .update_download_status(download.id, DownloadStatus::Imported, Some(old))
            .await
            .unwrap();
        s.manager.cleanup_tick().await;
        let view = s.manager.get(download.id).await.unwrap();
        assert_eq!(DownloadStatus::Cleaned, view.record.status);
        // Artifact removal used the delete flag.
        assert!(s
            .client
            .cancels
            .lock()
            .unwrap()
            .iter()
            .any(|(_, delete)| *delete));
    }

    #[test]
    fn edge_set_matches_the_lifecycle() {
        use DownloadStatus::*;
        let valid = [
            (Queued, Downloading),
            (Downloading, Completed),
            (Downloading, Failed),
            (Completed, Importing),
            (Importing, Imported),
            (Importing, Failed),
            (Imported, Cleaned),
            (Queued, Failed),
        ];
        for (from, to) in valid {
            assert!(from.can_transition(to), "{from} -> {to} should be legal");
        }
        let invalid = [
            (Queued, Completed),
            (Completed, Imported),
            (Failed, Queued),
            (Failed, Downloading),
            (Cleaned, Failed),
            (Imported, Importing),
        ];
        for (from, to) in invalid {
            assert!(!from.can_transition(to), "{from} -> {to} must be illegal");
        }
    }
}
