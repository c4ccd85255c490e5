use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Extension, Router};
use clap::Parser;
use dotenvy::dotenv;
use fetcharr::app_state::AppState;
use fetcharr::config::{self, Args, AppResources, ConfigFile, APP_RESOURCES};
use fetcharr::db::Db;
use fetcharr::downloader::sabnzbd::SabnzbdApi;
use fetcharr::downloader::DownloadClient;
use fetcharr::downloads::DownloadManager;
use fetcharr::events::EventBus;
use fetcharr::importer::Importer;
use fetcharr::indexer::newznab::NewznabApi;
use fetcharr::indexer::{Indexer, IndexerPool};
use fetcharr::plex::{MediaServerClient, PlexApi, PlexVerifier};
use fetcharr::searcher::Searcher;
use fetcharr::server::{api, OpenApiDoc};
use fetcharr::tracing::{init_tracer, LogChannel};
use fetcharr::verifier::Verifier;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() {
    let config_path = Args::parse().apply_configuration();
    if let Err(err) = AppResources::initiate() {
        panic!("Could not initiate app resources: {err}");
    }
    let log_channel = init_tracer(tracing::Level::INFO);

    if let Ok(path) = dotenv() {
        tracing::info!("Loaded env variables from: {}", path.display());
    }

    match ConfigFile::open_and_read(config_path).await {
        Ok(table) => config::CONFIG.apply_toml_settings(table),
        Err(err) => tracing::error!("Error reading config file: {err}"),
    }

    let cancellation_token = CancellationToken::new();
    let tracker = TaskTracker::new();

    let db = Db::connect(&APP_RESOURCES.database_path)
        .await
        .expect("database to be reachable");
    let db: &'static Db = Box::leak(Box::new(db));

    // Keep the persisted profile table in sync with configuration.
    let profiles = config::CONFIG.get_value::<config::QualityProfiles>().0;
    for profile in &profiles {
        let data = serde_json::to_string(profile).expect("profile serializes");
        if let Err(e) = db.upsert_quality_profile(&profile.name, &data).await {
            tracing::error!("Failed to sync quality profile {}: {e}", profile.name);
        }
    }

    let deadline = Duration::from_secs(
        config::CONFIG
            .get_value::<config::UpstreamDeadlineSeconds>()
            .0,
    );

    let mut indexers: Vec<Arc<dyn Indexer>> = Vec::new();
    for entry in config::CONFIG.get_value::<config::Indexers>().0 {
        match Url::parse(&entry.url) {
            Ok(url) => {
                indexers.push(Arc::new(NewznabApi::new(
                    entry.name.clone(),
                    url,
                    entry.api_key.clone(),
                    deadline,
                )));
                tracing::info!(indexer = entry.name, "Registered indexer");
            }
            Err(e) => tracing::error!(indexer = entry.name, "Invalid indexer url: {e}"),
        }
    }
    if indexers.is_empty() {
        tracing::warn!("No indexers configured, searches will fail");
    }
    let pool = IndexerPool::new(indexers, deadline);
    let searcher: &'static Searcher = Box::leak(Box::new(Searcher::new(pool)));

    let sabnzbd_url = config::CONFIG.get_value::<config::SabnzbdUrl>().0;
    let Some(sabnzbd_key) = config::CONFIG.get_value::<config::SabnzbdApiKey>().0 else {
        panic!("Missing sabnzbd api key, set it in the config file or the FETCHARR_SABNZBD_API_KEY environment variable");
    };
    let sabnzbd_url = Url::parse(&sabnzbd_url).expect("sabnzbd url to be valid");
    let download_client: Arc<dyn DownloadClient> =
        Arc::new(SabnzbdApi::new(sabnzbd_url, sabnzbd_key, deadline));

    let events: &'static EventBus = Box::leak(Box::new(EventBus::new()));

    let download_manager: &'static DownloadManager = Box::leak(Box::new(DownloadManager::new(
        db.clone(),
        download_client.clone(),
        searcher.clone(),
        events,
    )));

    let importer: &'static Importer =
        Box::leak(Box::new(Importer::new(db.clone(), download_manager, events)));

    let plex_url = config::CONFIG.get_value::<config::PlexUrl>().0;
    let plex_token = config::CONFIG.get_value::<config::PlexToken>().0;
    let plex: Option<&'static PlexApi> = match (plex_url, plex_token) {
        (Some(url), Some(token)) => {
            let url = Url::parse(&url).expect("plex url to be valid");
            Some(Box::leak(Box::new(PlexApi::new(url, token, deadline))))
        }
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!("Plex needs both plex_url and plex_token, verification disabled");
            None
        }
        (None, None) => None,
    };
    let media_server: Option<Arc<dyn MediaServerClient>> =
        plex.map(|p| Arc::new(p.clone()) as Arc<dyn MediaServerClient>);

    let verifier: &'static Verifier = Box::leak(Box::new(Verifier::new(
        db.clone(),
        download_client.clone(),
        media_server.clone(),
        download_manager,
    )));

    tracker.spawn(download_manager.run(cancellation_token.clone()));
    tracker.spawn(importer.run(cancellation_token.clone()));
    if let Some(server) = media_server {
        let plex_verifier: &'static PlexVerifier =
            Box::leak(Box::new(PlexVerifier::new(db.clone(), server, events)));
        tracker.spawn(plex_verifier.run(cancellation_token.clone()));
    }

    let app_state = AppState {
        db,
        events,
        searcher,
        download_manager,
        importer,
        plex,
        verifier,
        cancellation_token: cancellation_token.clone(),
    };

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/search", get(api::search))
        .route("/grab", post(api::grab))
        .route("/downloads", get(api::all_downloads))
        .route("/downloads/{id}", get(api::get_download))
        .route("/downloads/{id}/retry", post(api::retry_download))
        .route("/downloads/{id}/cancel", post(api::cancel_download))
        .route("/content", get(api::all_content).post(api::add_content))
        .route(
            "/content/{id}",
            get(api::get_content).delete(api::delete_content),
        )
        .route("/files", get(api::all_files))
        .route("/import", post(api::import_path))
        .route("/history", get(api::all_history))
        .route("/verify", post(api::verify))
        .route("/events", get(api::event_stream))
        .route("/plex/status", get(api::plex_status))
        .route("/plex/refresh", post(api::plex_refresh))
        .route("/profiles", get(api::all_profiles))
        .route("/log", get(LogChannel::into_sse_stream))
        .layer(Extension(log_channel));

    let app = Router::new()
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", OpenApiDoc::openapi()))
        .layer(cors)
        .with_state(app_state);

    let port = config::CONFIG.get_value::<config::Port>().0;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to start server on port {port}: {e}");
            return;
        }
    };
    tracing::info!("Starting server on port {port}");

    {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
                .unwrap();
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }
    tracing::trace!("Waiting for all tasks to finish");
    tracker.close();
    tracker.wait().await;
    tracing::info!("Gracefully shut down");
}
