use std::{error::Error, fmt::Display, num::ParseIntError};

use axum::{extract::FromRef, http::StatusCode, response::IntoResponse, Json};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Db, downloads::DownloadManager, events::EventBus, importer::Importer, plex::PlexApi,
    searcher::Searcher, verifier::Verifier,
};

#[derive(Clone)]
pub struct AppState {
    pub db: &'static Db,
    pub events: &'static EventBus,
    pub searcher: &'static Searcher,
    pub download_manager: &'static DownloadManager,
    pub importer: &'static Importer,
    pub plex: Option<&'static PlexApi>,
    pub verifier: &'static Verifier,
    pub cancellation_token: CancellationToken,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct AppError {
    #[serde(rename = "error")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip)]
    pub kind: AppErrorKind,
}

#[derive(Debug, Clone, PartialEq, utoipa::ToSchema)]
pub enum AppErrorKind {
    InternalError,
    NotFound,
    Duplicate,
    BadRequest,
}

impl Error for AppError {}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AppErrorKind::InternalError => write!(f, "Internal Error: {}", self.message),
            AppErrorKind::NotFound => write!(f, "Not Found Error: {}", self.message),
            AppErrorKind::Duplicate => write!(f, "Duplicate Error: {}", self.message),
            AppErrorKind::BadRequest => write!(f, "Bad Request: {}", self.message),
        }
    }
}

impl From<AppErrorKind> for StatusCode {
    fn from(val: AppErrorKind) -> Self {
        match val {
            AppErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppErrorKind::Duplicate => StatusCode::BAD_REQUEST,
            AppErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            code: None,
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::RowNotFound => AppError::not_found("Database row not found"),
            sqlx::Error::Database(e) if e.is_unique_violation() => AppError {
                message: "Record already exists".to_string(),
                code: Some("duplicate".to_string()),
                kind: AppErrorKind::Duplicate,
            },
            rest => AppError::internal_error(format!("{rest}")),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => AppError::not_found(value.to_string()),
            _ => AppError::internal_error(value.to_string()),
        }
    }
}

impl From<ParseIntError> for AppError {
    fn from(value: ParseIntError) -> Self {
        AppError::bad_request(value.to_string())
    }
}

impl AppError {
    pub fn new(message: impl AsRef<str>, kind: AppErrorKind) -> Self {
        Self {
            message: message.as_ref().into(),
            code: None,
            kind,
        }
    }

    pub fn not_found(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::NotFound)
    }

    pub fn bad_request(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::BadRequest)
    }

    pub fn duplicate(msg: impl AsRef<str>) -> AppError {
        Self {
            message: msg.as_ref().into(),
            code: Some("duplicate".to_string()),
            kind: AppErrorKind::Duplicate,
        }
    }

    pub fn internal_error(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::InternalError)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status: StatusCode = self.kind.clone().into();
        (status, Json(self)).into_response()
    }
}

impl FromRef<AppState> for &'static Db {
    fn from_ref(app_state: &AppState) -> &'static Db {
        app_state.db
    }
}

impl FromRef<AppState> for &'static EventBus {
    fn from_ref(app_state: &AppState) -> &'static EventBus {
        app_state.events
    }
}

impl FromRef<AppState> for &'static Searcher {
    fn from_ref(app_state: &AppState) -> &'static Searcher {
        app_state.searcher
    }
}

impl FromRef<AppState> for &'static DownloadManager {
    fn from_ref(app_state: &AppState) -> &'static DownloadManager {
        app_state.download_manager
    }
}

impl FromRef<AppState> for &'static Verifier {
    fn from_ref(app_state: &AppState) -> &'static Verifier {
        app_state.verifier
    }
}
