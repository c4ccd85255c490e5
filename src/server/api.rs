use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

use super::Pagination;
use crate::app_state::{AppError, AppState};
use crate::config;
use crate::db::{ContentType, DbContent, DbEpisode, DbFile, DbHistory, NewContent};
use crate::downloads::{DownloadManager, DownloadView, GrabSpec};
use crate::events::{self, EventBus};
use crate::plex::PlexSection;
use crate::scorer::QualityProfile;
use crate::searcher::{SearchOutcome, SearchQuery, Searcher};
use crate::verifier::{Verifier, VerifyReport};

fn profile_named(name: &str) -> Result<QualityProfile, AppError> {
    config::CONFIG
        .get_value::<config::QualityProfiles>()
        .by_name(name)
        .cloned()
        .ok_or_else(|| AppError::bad_request(format!("unknown quality profile {name}")))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SearchParams {
    /// Free text query
    q: String,
    content_type: ContentType,
    season: Option<u16>,
    episode: Option<u16>,
    imdb_id: Option<String>,
    tvdb_id: Option<i64>,
    /// Quality profile name, defaults to "hd"
    profile: Option<String>,
}

/// Search all configured indexers
#[utoipa::path(
    get,
    path = "/api/v1/search",
    params(SearchParams),
    responses(
        (status = 200, body = SearchOutcome),
        (status = 400, body = AppError),
    ),
    tag = "Search",
)]
pub async fn search(
    State(searcher): State<&'static Searcher>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchOutcome>, AppError> {
    let profile = profile_named(params.profile.as_deref().unwrap_or("hd"))?;
    let query = SearchQuery {
        text: params.q,
        content_type: params.content_type,
        season: params.season,
        episode: params.episode,
        imdb_id: params.imdb_id,
        tvdb_id: params.tvdb_id,
    };
    let outcome = searcher.search(&query, &profile).await?;
    Ok(Json(outcome))
}

/// Send a release to the downloader and start tracking it
#[utoipa::path(
    post,
    path = "/api/v1/grab",
    request_body = GrabSpec,
    responses(
        (status = 200, body = DownloadView),
        (status = 400, body = AppError),
    ),
    tag = "Downloads",
)]
pub async fn grab(
    State(manager): State<&'static DownloadManager>,
    Json(spec): Json<GrabSpec>,
) -> Result<Json<DownloadView>, AppError> {
    let download = manager.grab(spec).await?;
    manager.get(download.id).await.map(Json)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct DownloadsParams {
    /// Only downloads that have not reached a terminal state
    #[serde(default)]
    active: bool,
}

/// List downloads
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    params(DownloadsParams),
    responses((status = 200, body = Vec<DownloadView>)),
    tag = "Downloads",
)]
pub async fn all_downloads(
    State(manager): State<&'static DownloadManager>,
    Query(params): Query<DownloadsParams>,
) -> Result<Json<Vec<DownloadView>>, AppError> {
    manager.list(params.active).await.map(Json)
}

/// Get a single download with live stats
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    params(("id", description = "Download id")),
    responses(
        (status = 200, body = DownloadView),
        (status = 404, body = AppError),
    ),
    tag = "Downloads",
)]
pub async fn get_download(
    State(manager): State<&'static DownloadManager>,
    Path(id): Path<i64>,
) -> Result<Json<DownloadView>, AppError> {
    manager.get(id).await.map(Json)
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RetryResponse {
    pub download_id: i64,
}

/// Search again and grab a replacement for a failed download
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/retry",
    params(("id", description = "Download id")),
    responses(
        (status = 200, body = RetryResponse),
        (status = 400, body = AppError),
        (status = 404, body = AppError),
    ),
    tag = "Downloads",
)]
pub async fn retry_download(
    State(manager): State<&'static DownloadManager>,
    Path(id): Path<i64>,
) -> Result<Json<RetryResponse>, AppError> {
    let download_id = manager.retry(id).await?;
    Ok(Json(RetryResponse { download_id }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CancelParams {
    /// Also delete downloaded artifacts
    #[serde(default)]
    delete_files: bool,
}

/// Cancel a download. A no-op when it already reached a terminal state
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/cancel",
    params(("id", description = "Download id"), CancelParams),
    responses(
        (status = 200),
        (status = 404, body = AppError),
    ),
    tag = "Downloads",
)]
pub async fn cancel_download(
    State(manager): State<&'static DownloadManager>,
    Path(id): Path<i64>,
    Query(params): Query<CancelParams>,
) -> Result<(), AppError> {
    manager.cancel(id, params.delete_files).await
}

/// List tracked content
#[utoipa::path(
    get,
    path = "/api/v1/content",
    params(Pagination),
    responses((status = 200, body = Vec<DbContent>)),
    tag = "Content",
)]
pub async fn all_content(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<DbContent>>, AppError> {
    state
        .db
        .all_content(pagination.limit(), pagination.offset())
        .await
        .map(Json)
        .map_err(Into::into)
}

/// Start tracking a movie or series
#[utoipa::path(
    post,
    path = "/api/v1/content",
    request_body = NewContent,
    responses((status = 200, body = DbContent)),
    tag = "Content",
)]
pub async fn add_content(
    State(state): State<AppState>,
    Json(new_content): Json<NewContent>,
) -> Result<Json<DbContent>, AppError> {
    profile_named(&new_content.quality_profile)?;
    let id = state.db.insert_content(new_content).await?;
    state.db.content(id).await.map(Json).map_err(Into::into)
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ContentDetail {
    #[serde(flatten)]
    pub content: DbContent,
    pub episodes: Vec<DbEpisode>,
    pub files: Vec<DbFile>,
}

/// Get content with its episodes and files
#[utoipa::path(
    get,
    path = "/api/v1/content/{id}",
    params(("id", description = "Content id")),
    responses(
        (status = 200, body = ContentDetail),
        (status = 404, body = AppError),
    ),
    tag = "Content",
)]
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ContentDetail>, AppError> {
    let content = state
        .db
        .content(id)
        .await
        .map_err(|_| AppError::not_found("content is not found"))?;
    let episodes = state.db.episodes(id).await?;
    let files = state.db.files(Some(id)).await?;
    Ok(Json(ContentDetail {
        content,
        episodes,
        files,
    }))
}

/// Stop tracking content, removing its files and episodes
#[utoipa::path(
    delete,
    path = "/api/v1/content/{id}",
    params(("id", description = "Content id")),
    responses(
        (status = 200),
        (status = 404, body = AppError),
    ),
    tag = "Content",
)]
pub async fn delete_content(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(), AppError> {
    state
        .db
        .content(id)
        .await
        .map_err(|_| AppError::not_found("content is not found"))?;
    state.db.remove_content(id).await.map_err(Into::into)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct FilesParams {
    content_id: Option<i64>,
}

/// List imported files
#[utoipa::path(
    get,
    path = "/api/v1/files",
    params(FilesParams),
    responses((status = 200, body = Vec<DbFile>)),
    tag = "Content",
)]
pub async fn all_files(
    State(state): State<AppState>,
    Query(params): Query<FilesParams>,
) -> Result<Json<Vec<DbFile>>, AppError> {
    state.db.files(params.content_id).await.map(Json).map_err(Into::into)
}

/// Audit log of lifecycle events
#[utoipa::path(
    get,
    path = "/api/v1/history",
    params(Pagination),
    responses((status = 200, body = Vec<DbHistory>)),
    tag = "System",
)]
pub async fn all_history(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<DbHistory>>, AppError> {
    state
        .db
        .history(pagination.limit(), pagination.offset())
        .await
        .map(Json)
        .map_err(Into::into)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ImportRequest {
    /// File or directory to pull into the library
    pub path: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ImportResponse {
    pub imported: Vec<String>,
}

/// Manually import a file or directory from outside the download lifecycle
#[utoipa::path(
    post,
    path = "/api/v1/import",
    request_body = ImportRequest,
    responses(
        (status = 200, body = ImportResponse),
        (status = 404, body = AppError),
    ),
    tag = "Content",
)]
pub async fn import_path(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, AppError> {
    let imported = state
        .importer
        .import_manual(std::path::Path::new(&request.path))
        .await?;
    Ok(Json(ImportResponse {
        imported: imported
            .into_iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct VerifyParams {
    download_id: Option<i64>,
}

/// Cross-check download state against the downloader, disk and media server
#[utoipa::path(
    post,
    path = "/api/v1/verify",
    params(VerifyParams),
    responses(
        (status = 200, body = VerifyReport),
        (status = 404, body = AppError),
    ),
    tag = "System",
)]
pub async fn verify(
    State(verifier): State<&'static Verifier>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<VerifyReport>, AppError> {
    verifier.verify(params.download_id).await.map(Json)
}

/// Live event stream over SSE
pub async fn event_stream(
    State(events): State<&'static EventBus>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = events.subscribe(events::ALL_KINDS, 64);
    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(SseEvent::default()
            .json_data(&event)
            .unwrap_or_else(|_| SseEvent::default()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Media server sections, as a reachability probe
#[utoipa::path(
    get,
    path = "/api/v1/plex/status",
    responses(
        (status = 200, body = Vec<PlexSection>),
        (status = 400, body = AppError),
    ),
    tag = "System",
)]
pub async fn plex_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlexSection>>, AppError> {
    let plex = state
        .plex
        .ok_or_else(|| AppError::bad_request("no media server is configured"))?;
    use crate::plex::MediaServerClient;
    plex.sections().await.map(Json)
}

/// Ask the media server to rescan all library sections
#[utoipa::path(
    post,
    path = "/api/v1/plex/refresh",
    responses(
        (status = 200),
        (status = 400, body = AppError),
    ),
    tag = "System",
)]
pub async fn plex_refresh(State(state): State<AppState>) -> Result<(), AppError> {
    let plex = state
        .plex
        .ok_or_else(|| AppError::bad_request("no media server is configured"))?;
    use crate::plex::MediaServerClient;
    for section in plex.sections().await? {
        plex.refresh_section(&section.key).await?;
    }
    Ok(())
}

/// Configured quality profiles
#[utoipa::path(
    get,
    path = "/api/v1/profiles",
    responses((status = 200, body = Vec<QualityProfile>)),
    tag = "Search",
)]
pub async fn all_profiles() -> Json<Vec<QualityProfile>> {
    Json(config::CONFIG.get_value::<config::QualityProfiles>().0)
}
