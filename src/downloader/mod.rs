use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::app_state::AppError;

pub mod sabnzbd;

/// Result of handing a release URL to the external downloader.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SubmittedDownload {
    /// Opaque id the client uses for this job from now on
    pub client_id: String,
    pub category: Option<String>,
}

/// Live view of one job inside the external downloader.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ClientStatus {
    Queued,
    Downloading {
        /// 0–100
        progress: f32,
        size_bytes: u64,
        speed_bps: u64,
        eta: Option<Duration>,
    },
    Completed {
        path: PathBuf,
    },
    Failed {
        reason: String,
    },
}

/// The minimal surface the lifecycle needs from any download client.
/// Implementations are chosen by config at startup.
#[async_trait::async_trait]
pub trait DownloadClient: Send + Sync {
    fn client_name(&self) -> &'static str;

    /// Submit a release by URL. Returns the client's opaque id.
    async fn submit(
        &self,
        url: &str,
        name: &str,
        category: Option<&str>,
    ) -> Result<SubmittedDownload, AppError>;

    /// Look a job up by client id. `None` means the client has no trace of
    /// it, which the verifier reports as `missing_in_client`.
    async fn status(&self, client_id: &str) -> Result<Option<ClientStatus>, AppError>;

    /// Cancel a job, optionally deleting its on-disk artifacts.
    async fn cancel(&self, client_id: &str, delete_files: bool) -> Result<(), AppError>;

    /// Cheap reachability probe.
    async fn version(&self) -> Result<String, AppError>;
}
