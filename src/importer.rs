use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::app_state::AppError;
use crate::config;
use crate::db::{ContentType, Db, DbContent, NewFile};
use crate::downloads::DownloadManager;
use crate::events::{EventBus, EventKind, EventPayload};
use crate::parser;
use crate::utils;

/// Moves finished downloads into the library under their canonical name.
///
/// Lives off the event bus: every `DownloadCompleted` becomes either an
/// `ImportCompleted` (via the manager) or a failed download.
pub struct Importer {
    db: Db,
    manager: &'static DownloadManager,
    events: &'static EventBus,
}

impl Importer {
    pub fn new(db: Db, manager: &'static DownloadManager, events: &'static EventBus) -> Self {
        Self {
            db,
            manager,
            events,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut rx = self.events.subscribe(&[EventKind::DownloadCompleted], 64);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let EventPayload::DownloadCompleted { download_id, path, .. } = event.payload
                    else {
                        continue;
                    };
                    self.handle_completed(download_id, Path::new(&path)).await;
                }
            }
        }
        tracing::info!("Importer stopped");
    }

    pub async fn handle_completed(&self, download_id: i64, source: &Path) {
        match self.import(download_id, source).await {
            Ok(paths) => {
                tracing::info!(download_id, count = paths.len(), "Import finished");
            }
            Err(e) => {
                tracing::warn!(download_id, "Import failed: {e}");
                if let Err(e) = self.manager.fail_import(download_id, &e.message).await {
                    tracing::error!(download_id, "Could not mark import as failed: {e}");
                }
            }
        }
    }

    async fn import(&self, download_id: i64, source: &Path) -> Result<Vec<PathBuf>, AppError> {
        let download = self.manager.begin_import(download_id).await?;
        let content = self.db.content(download.content_id).await?;
        let delete_source = config::CONFIG.get_value::<config::DeleteAfterImport>().0;

        let sources = collect_video_files(source)?;
        if sources.is_empty() {
            return Err(AppError::not_found(format!(
                "no importable video found at {}",
                source.display()
            )));
        }

        let info = parser::parse(&download.release_name);
        let quality = info.resolution.as_token().to_string();
        let release_source = info.source.as_token().to_string();

        let hints = ImportHints {
            season: download.season,
            episode_id: download.episode_id,
        };
        let mut files = Vec::with_capacity(sources.len());
        let mut destinations = Vec::with_capacity(sources.len());
        for file_source in &sources {
            let (destination, episode_id) =
                self.destination_for(&content, hints, file_source).await?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).await?;
            }
            move_file(file_source, &destination, delete_source).await?;
            let size = fs::metadata(&destination).await?.len();
            files.push(NewFile {
                content_id: content.id,
                episode_id,
                path: destination.to_string_lossy().to_string(),
                size: size as i64,
                quality: quality.clone(),
                source: release_source.clone(),
            });
            destinations.push(destination);
        }

        self.manager.finish_import(download_id, files).await?;

        if delete_source && source.is_dir() {
            if let Err(e) = fs::remove_dir_all(source).await {
                tracing::warn!("Could not remove import source dir: {e}");
            }
        }
        Ok(destinations)
    }

    /// Import a file or directory that never went through the download
    /// lifecycle. The name is parsed and fuzzy-matched against the library
    /// to find the owning content.
    pub async fn import_manual(&self, source: &Path) -> Result<Vec<PathBuf>, AppError> {
        let sources = collect_video_files(source)?;
        if sources.is_empty() {
            return Err(AppError::not_found(format!(
                "no importable video found at {}",
                source.display()
            )));
        }
        let candidates = self.db.all_content(500, 0).await?;
        if candidates.is_empty() {
            return Err(AppError::bad_request("the library tracks no content yet"));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let info = parser::parse(&name);
        let titles: Vec<String> = candidates.iter().map(|c| c.title.clone()).collect();
        let matched = crate::matcher::match_title(&info.title, &titles);
        if matched.confidence < crate::matcher::Confidence::Medium {
            return Err(AppError::not_found(format!(
                "no tracked content matches \"{}\"",
                info.title
            )));
        }
        let content = candidates
            .into_iter()
            .find(|c| c.title == matched.title)
            .expect("matched title came from the candidate list");
        tracing::info!(
            content_id = content.id,
            score = matched.score,
            "Manual import matched {name} to {}",
            content.title
        );

        let delete_source = config::CONFIG.get_value::<config::DeleteAfterImport>().0;
        let quality = info.resolution.as_token().to_string();
        let release_source = info.source.as_token().to_string();
        let hints = ImportHints {
            season: None,
            episode_id: None,
        };
        let mut files = Vec::with_capacity(sources.len());
        let mut destinations = Vec::with_capacity(sources.len());
        for file_source in &sources {
            let (destination, episode_id) =
                self.destination_for(&content, hints, file_source).await?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).await?;
            }
            move_file(file_source, &destination, delete_source).await?;
            let size = fs::metadata(&destination).await?.len();
            files.push(NewFile {
                content_id: content.id,
                episode_id,
                path: destination.to_string_lossy().to_string(),
                size: size as i64,
                quality: quality.clone(),
                source: release_source.clone(),
            });
            destinations.push(destination);
        }
        let first_path = files[0].path.clone();
        self.db.record_manual_import(files).await?;
        self.events.publish(EventPayload::ImportCompleted {
            download_id: 0,
            content_id: content.id,
            file_path: first_path,
        });
        if delete_source && source.is_dir() {
            if let Err(e) = fs::remove_dir_all(source).await {
                tracing::warn!("Could not remove import source dir: {e}");
            }
        }
        Ok(destinations)
    }

    /// Canonical library path for one video file of this download.
    async fn destination_for(
        &self,
        content: &DbContent,
        hints: ImportHints,
        source: &Path,
    ) -> Result<(PathBuf, Option<i64>), AppError> {
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        match content.content_type {
            ContentType::Movie => {
                let template = config::CONFIG.get_value::<config::MovieNamingTemplate>().0;
                let relative = render_template(&template, &content.title, content.year, 0, 0, &extension);
                Ok((Path::new(&content.root_path).join(relative), None))
            }
            ContentType::Series => {
                // For packs every file names its own episode; otherwise the
                // download record already points at one.
                let file_name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let parsed = parser::parse(&file_name);
                let season = parsed.season.max(hints.season.unwrap_or(0) as u16);
                let episode = parsed.episode;
                let episode_id = match hints.episode_id {
                    Some(id) => Some(id),
                    None if episode > 0 => Some(
                        self.db
                            .ensure_episode(content.id, season as i64, episode as i64)
                            .await?,
                    ),
                    None => None,
                };
                let template = config::CONFIG.get_value::<config::EpisodeNamingTemplate>().0;
                let relative =
                    render_template(&template, &content.title, content.year, season, episode, &extension);
                Ok((Path::new(&content.root_path).join(relative), episode_id))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ImportHints {
    season: Option<i64>,
    episode_id: Option<i64>,
}

fn collect_video_files(source: &Path) -> Result<Vec<PathBuf>, AppError> {
    if source.is_dir() {
        let mut files = utils::walk_recursive(source, Some(|p: &Path| utils::is_video_file(p)))?;
        files.sort();
        Ok(files)
    } else if source.is_file() {
        Ok(vec![source.to_path_buf()])
    } else {
        Err(AppError::not_found(format!(
            "import source {} does not exist",
            source.display()
        )))
    }
}

/// Rename first; a cross-device move degrades to copy-then-unlink. With
/// `delete_source` off the source is left alone and the file is copied.
async fn move_file(source: &Path, destination: &Path, delete_source: bool) -> Result<(), AppError> {
    if !delete_source {
        fs::copy(source, destination).await?;
        return Ok(());
    }
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            fs::copy(source, destination).await?;
            fs::remove_file(source).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn render_template(
    template: &str,
    title: &str,
    year: i64,
    season: u16,
    episode: u16,
    extension: &str,
) -> String {
    template
        .replace("{title}", title)
        .replace("{year}", &year.to_string())
        .replace("{season}", &format!("{season:02}"))
        .replace("{episode}", &format!("{episode:02}"))
        .replace("{ext}", extension)
}
