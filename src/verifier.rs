use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::app_state::AppError;
use crate::config;
use crate::db::{Db, DbDownload};
use crate::downloader::DownloadClient;
use crate::downloads::{DownloadManager, DownloadStatus};
use crate::plex::MediaServerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Stuck,
    MissingInClient,
    MissingOnDisk,
    MissingInPlex,
    Orphaned,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Problem {
    pub download_id: i64,
    pub issue: IssueKind,
    /// Which checks fired, machine readable
    pub checks: Vec<String>,
    pub likely_cause: String,
    pub suggested_fixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SourceHealth {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct VerifyReport {
    pub checked: usize,
    pub passed: usize,
    pub problems: Vec<Problem>,
    pub downloader: SourceHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_server: Option<SourceHealth>,
}

/// Cross-checks persisted download state against the downloader, the
/// filesystem and the media server. Read-only: it reports, never repairs.
pub struct Verifier {
    db: Db,
    client: Arc<dyn DownloadClient>,
    media_server: Option<Arc<dyn MediaServerClient>>,
    manager: &'static DownloadManager,
}

impl Verifier {
    pub fn new(
        db: Db,
        client: Arc<dyn DownloadClient>,
        media_server: Option<Arc<dyn MediaServerClient>>,
        manager: &'static DownloadManager,
    ) -> Self {
        Self {
            db,
            client,
            media_server,
            manager,
        }
    }

    pub async fn verify(&self, target: Option<i64>) -> Result<VerifyReport, AppError> {
        let downloader = match self.client.version().await {
            Ok(_) => SourceHealth {
                reachable: true,
                error: None,
            },
            Err(e) => SourceHealth {
                reachable: false,
                error: Some(e.to_string()),
            },
        };
        let media_server = match &self.media_server {
            Some(server) => Some(match server.sections().await {
                Ok(_) => SourceHealth {
                    reachable: true,
                    error: None,
                },
                Err(e) => SourceHealth {
                    reachable: false,
                    error: Some(e.to_string()),
                },
            }),
            None => None,
        };

        let downloads = match target {
            Some(id) => vec![self
                .db
                .download(id)
                .await
                .map_err(|_| AppError::not_found("download is not found"))?],
            None => self.db.downloads(false).await?,
        };

        let mut problems = Vec::new();
        let mut failing = std::collections::HashSet::new();
        for download in &downloads {
            let before = problems.len();
            self.check_download(download, &downloader, media_server.as_ref(), &mut problems)
                .await;
            if problems.len() > before {
                failing.insert(download.id);
            }
        }

        Ok(VerifyReport {
            checked: downloads.len(),
            passed: downloads.len() - failing.len(),
            problems,
            downloader,
            media_server,
        })
    }

    async fn check_download(
        &self,
        download: &DbDownload,
        downloader: &SourceHealth,
        media_server: Option<&SourceHealth>,
        problems: &mut Vec<Problem>,
    ) {
        match self.db.content(download.content_id).await {
            Ok(_) => {}
            Err(_) => {
                problems.push(Problem {
                    download_id: download.id,
                    issue: IssueKind::Orphaned,
                    checks: vec!["content_exists".into()],
                    likely_cause: "the content this download belongs to was removed".into(),
                    suggested_fixes: vec![format!(
                        "POST /api/v1/downloads/{}/cancel",
                        download.id
                    )],
                });
            }
        }

        if download.status == DownloadStatus::Downloading {
            let threshold_minutes = config::CONFIG
                .get_value::<config::StuckThresholdMinutes>()
                .0;
            let threshold = Duration::from_secs(threshold_minutes * 60);
            if let Some(stalled) = self.manager.stalled_for(download.id) {
                if stalled > threshold {
                    let mut checks = vec!["progress_stalled".to_string()];
                    let live = self.manager.live_stats(download.id);
                    if live.and_then(|l| l.eta_secs).is_none() {
                        checks.push("no_eta".to_string());
                    }
                    problems.push(Problem {
                        download_id: download.id,
                        issue: IssueKind::Stuck,
                        checks,
                        likely_cause: format!(
                            "no progress for {} minutes, downloader may be wedged",
                            stalled.as_secs() / 60
                        ),
                        suggested_fixes: vec![
                            format!("POST /api/v1/downloads/{}/retry", download.id),
                            format!(
                                "POST /api/v1/downloads/{}/cancel?deleteFiles=true",
                                download.id
                            ),
                        ],
                    });
                }
            }
        }

        let client_should_know = matches!(
            download.status,
            DownloadStatus::Queued | DownloadStatus::Downloading | DownloadStatus::Completed
        );
        if client_should_know && downloader.reachable {
            match self.client.status(&download.client_id).await {
                Ok(None) => {
                    problems.push(Problem {
                        download_id: download.id,
                        issue: IssueKind::MissingInClient,
                        checks: vec!["client_lookup".into()],
                        likely_cause: "the downloader lost or purged this job".into(),
                        suggested_fixes: vec![format!(
                            "POST /api/v1/downloads/{}/retry",
                            download.id
                        )],
                    });
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        download_id = download.id,
                        "Client lookup failed during verify: {e}"
                    );
                }
            }
        }

        let imported = matches!(
            download.status,
            DownloadStatus::Imported | DownloadStatus::Cleaned
        );
        if imported {
            if let Ok(files) = self.db.files(Some(download.content_id)).await {
                let missing: Vec<_> = files
                    .iter()
                    .filter(|f| !Path::new(&f.path).exists())
                    .collect();
                if !missing.is_empty() {
                    problems.push(Problem {
                        download_id: download.id,
                        issue: IssueKind::MissingOnDisk,
                        checks: vec!["file_exists".into()],
                        likely_cause: "imported file was moved or deleted outside the library"
                            .into(),
                        suggested_fixes: vec![format!(
                            "POST /api/v1/downloads/{}/retry",
                            download.id
                        )],
                    });
                }
            }

            if let (Some(server), Some(health)) = (&self.media_server, media_server) {
                if health.reachable {
                    if let Ok(content) = self.db.content(download.content_id).await {
                        let found = match lookup_guids(server.as_ref(), &content).await {
                            Ok(found) => found,
                            Err(e) => {
                                tracing::warn!(
                                    download_id = download.id,
                                    "Media server lookup failed during verify: {e}"
                                );
                                return;
                            }
                        };
                        if !found {
                            problems.push(Problem {
                                download_id: download.id,
                                issue: IssueKind::MissingInPlex,
                                checks: vec!["guid_lookup".into()],
                                likely_cause: "media server has not indexed the imported file"
                                    .into(),
                                suggested_fixes: vec!["POST /api/v1/plex/refresh".to_string()],
                            });
                        }
                    }
                }
            }
        }
    }
}

async fn lookup_guids(
    server: &dyn MediaServerClient,
    content: &crate::db::DbContent,
) -> Result<bool, AppError> {
    let mut guids = Vec::new();
    if let Some(imdb) = &content.imdb_id {
        guids.push(format!("imdb://{imdb}"));
    }
    if let Some(tvdb) = content.tvdb_id {
        guids.push(format!("tvdb://{tvdb}"));
    }
    for guid in guids {
        if server.find_by_guid(&guid).await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::db::tests::{movie_content, sab_download, temp_db};
    use crate::downloader::{ClientStatus, SubmittedDownload};
    use crate::events::EventBus;
    use crate::indexer::{Indexer, IndexerPool, ProspectRelease, SearchRequest};
    use crate::plex::PlexSection;
    use crate::searcher::Searcher;

    #[derive(Default)]
    struct FakeClient {
        statuses: Mutex<HashMap<String, ClientStatus>>,
    }

    #[async_trait::async_trait]
    impl DownloadClient for FakeClient {
        fn client_name(&self) -> &'static str {
            "mock"
        }

        async fn submit(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<SubmittedDownload, AppError> {
            Ok(SubmittedDownload {
                client_id: "nzo".into(),
                category: None,
            })
        }

        async fn status(&self, client_id: &str) -> Result<Option<ClientStatus>, AppError> {
            Ok(self.statuses.lock().unwrap().get(client_id).cloned())
        }

        async fn cancel(&self, _: &str, _: bool) -> Result<(), AppError> {
            Ok(())
        }

        async fn version(&self) -> Result<String, AppError> {
            Ok("mock".into())
        }
    }

    struct NoIndexer;

    #[async_trait::async_trait]
    impl Indexer for NoIndexer {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError> {
            Ok(Vec::new())
        }

        fn indexer_name(&self) -> &str {
            "static"
        }
    }

    struct EmptyServer;

    #[async_trait::async_trait]
    impl MediaServerClient for EmptyServer {
        async fn find_by_guid(&self, _: &str) -> Result<Option<String>, AppError> {
            Ok(None)
        }

        async fn sections(&self) -> Result<Vec<PlexSection>, AppError> {
            Ok(Vec::new())
        }

        async fn refresh_section(&self, _: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    async fn setup(
        media_server: Option<Arc<dyn MediaServerClient>>,
    ) -> (Verifier, Db, Arc<FakeClient>, i64, &'static DownloadManager) {
        let db = temp_db().await;
        let content_id = db.insert_content(movie_content()).await.unwrap();
        let client = Arc::new(FakeClient::default());
        let events: &'static EventBus = Box::leak(Box::new(EventBus::new()));
        let searcher = Searcher::new(IndexerPool::new(
            vec![Arc::new(NoIndexer)],
            Duration::from_secs(5),
        ));
        let manager: &'static DownloadManager = Box::leak(Box::new(DownloadManager::new(
            db.clone(),
            client.clone(),
            searcher,
            events,
        )));
        let verifier = Verifier::new(db.clone(), client.clone(), media_server, manager);
        (verifier, db, client, content_id, manager)
    }

    #[test_log::test(tokio::test)]
    async fn healthy_queue_passes() {
        let (verifier, db, client, content_id, _) = setup(None).await;
        let id = db.insert_download(sab_download(content_id, "nzo_1")).await.unwrap();
        client
            .statuses
            .lock()
            .unwrap()
            .insert("nzo_1".into(), ClientStatus::Queued);
        let report = verifier.verify(Some(id)).await.unwrap();
        assert_eq!(1, report.checked);
        assert_eq!(1, report.passed);
        assert!(report.problems.is_empty());
        assert!(report.downloader.reachable);
    }

    #[test_log::test(tokio::test)]
    async fn missing_in_client_is_reported() {
        let (verifier, db, _, content_id, _) = setup(None).await;
        let id = db.insert_download(sab_download(content_id, "nzo_2")).await.unwrap();
        let report = verifier.verify(Some(id)).await.unwrap();
        assert_eq!(1, report.problems.len());
        assert_eq!(IssueKind::MissingInClient, report.problems[0].issue);
        assert_eq!(0, report.passed);
    }

    #[test_log::test(tokio::test)]
    async fn orphaned_download_is_reported() {
        let (verifier, db, client, content_id, _) = setup(None).await;
        let id = db.insert_download(sab_download(content_id, "nzo_3")).await.unwrap();
        client
            .statuses
            .lock()
            .unwrap()
            .insert("nzo_3".into(), ClientStatus::Queued);
        db.remove_content(content_id).await.unwrap();
        let report = verifier.verify(Some(id)).await.unwrap();
        assert!(report
            .problems
            .iter()
            .any(|p| p.issue == IssueKind::Orphaned));
    }

    #[test_log::test(tokio::test)]
    async fn imported_but_unindexed_is_missing_in_plex() {
        let (verifier, db, _, content_id, _) = setup(Some(Arc::new(EmptyServer))).await;
        let id = db.insert_download(sab_download(content_id, "nzo_4")).await.unwrap();
        let file = temp_file();
        db.record_import(
            vec![crate::db::NewFile {
                content_id,
                episode_id: None,
                path: file.to_string_lossy().to_string(),
                size: 10,
                quality: "1080p".into(),
                source: "webdl".into(),
            }],
            id,
            Some(time::OffsetDateTime::now_utc()),
        )
        .await
        .unwrap();
        let report = verifier.verify(Some(id)).await.unwrap();
        assert_eq!(1, report.problems.len());
        assert_eq!(IssueKind::MissingInPlex, report.problems[0].issue);
    }

    #[test_log::test(tokio::test)]
    async fn vanished_file_is_missing_on_disk() {
        let (verifier, db, _, content_id, _) = setup(None).await;
        let id = db.insert_download(sab_download(content_id, "nzo_5")).await.unwrap();
        db.record_import(
            vec![crate::db::NewFile {
                content_id,
                episode_id: None,
                path: "/nowhere/at/all.mkv".into(),
                size: 10,
                quality: "1080p".into(),
                source: "webdl".into(),
            }],
            id,
            Some(time::OffsetDateTime::now_utc()),
        )
        .await
        .unwrap();
        let report = verifier.verify(Some(id)).await.unwrap();
        assert!(report
            .problems
            .iter()
            .any(|p| p.issue == IssueKind::MissingOnDisk));
    }

    #[test_log::test(tokio::test)]
    async fn stalled_download_is_reported_stuck() {
        // A zero threshold makes any stall long enough.
        config::CONFIG.apply_toml_settings("stuck_threshold_minutes = 0".parse().unwrap());
        let (verifier, _, client, content_id, manager) = setup(None).await;
        let download = manager
            .grab(crate::downloads::GrabSpec {
                content_id,
                episode_id: None,
                season: None,
                is_complete_season: false,
                url: "https://indexer.test/get/0".into(),
                release_name: "Test.Movie.2024.1080p.WEB-DL.H264-X".into(),
                indexer: "nzbhub".into(),
            })
            .await
            .unwrap();
        client.statuses.lock().unwrap().insert(
            download.client_id.clone(),
            ClientStatus::Downloading {
                progress: 10.0,
                size_bytes: 1 << 30,
                speed_bps: 0,
                eta: None,
            },
        );
        manager.poll_tick().await;

        let report = verifier.verify(Some(download.id)).await.unwrap();
        let stuck: Vec<_> = report
            .problems
            .iter()
            .filter(|p| p.issue == IssueKind::Stuck)
            .collect();
        assert_eq!(1, stuck.len());
        assert_eq!(
            vec!["progress_stalled".to_string(), "no_eta".to_string()],
            stuck[0].checks
        );
        // The verifier reports; it never repairs.
        assert_eq!(
            crate::downloads::DownloadStatus::Downloading,
            manager.get(download.id).await.unwrap().record.status
        );
    }

    fn temp_file() -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push("fetcharr-test");
        std::fs::create_dir_all(&path).unwrap();
        path.push(format!("{}.mkv", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"x").unwrap();
        path
    }
}
