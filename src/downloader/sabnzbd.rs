use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use super::{ClientStatus, DownloadClient, SubmittedDownload};
use crate::app_state::AppError;
use crate::request_client::UpstreamClient;

/// SABnzbd JSON API client.
#[derive(Debug)]
pub struct SabnzbdApi {
    base_url: Url,
    api_key: String,
    client: UpstreamClient,
}

impl SabnzbdApi {
    pub fn new(base_url: Url, api_key: String, deadline: Duration) -> Self {
        let client = UpstreamClient::new(Client::new(), 5, Duration::from_millis(200), deadline);
        Self {
            base_url,
            api_key,
            client,
        }
    }

    fn api_url(&self, mode: &str, extra: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("downloader url is a valid base")
            .push("api");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("mode", mode);
            query.append_pair("output", "json");
            query.append_pair("apikey", &self.api_key);
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        mode: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let request = Request::new(Method::GET, self.api_url(mode, extra));
        self.client.json(request).await
    }

    async fn queue_slot(&self, client_id: &str) -> Result<Option<SabQueueSlot>, AppError> {
        let response: SabQueueResponse = self.call("queue", &[]).await?;
        Ok(response
            .queue
            .slots
            .into_iter()
            .find(|slot| slot.nzo_id == client_id))
    }

    async fn history_slot(&self, client_id: &str) -> Result<Option<SabHistorySlot>, AppError> {
        let response: SabHistoryResponse = self.call("history", &[]).await?;
        Ok(response
            .history
            .slots
            .into_iter()
            .find(|slot| slot.nzo_id == client_id))
    }
}

#[async_trait::async_trait]
impl DownloadClient for SabnzbdApi {
    fn client_name(&self) -> &'static str {
        "sabnzbd"
    }

    async fn submit(
        &self,
        url: &str,
        name: &str,
        category: Option<&str>,
    ) -> Result<SubmittedDownload, AppError> {
        let mut extra = vec![("name", url), ("nzbname", name)];
        if let Some(category) = category {
            extra.push(("cat", category));
        }
        let response: SabAddResponse = self.call("addurl", &extra).await?;
        if !response.status {
            return Err(AppError::internal_error("downloader refused the url"));
        }
        let client_id = response
            .nzo_ids
            .into_iter()
            .next()
            .ok_or_else(|| AppError::internal_error("downloader returned no job id"))?;
        Ok(SubmittedDownload {
            client_id,
            category: category.map(str::to_string),
        })
    }

    async fn status(&self, client_id: &str) -> Result<Option<ClientStatus>, AppError> {
        if let Some(slot) = self.queue_slot(client_id).await? {
            return Ok(Some(slot.into_status()));
        }
        if let Some(slot) = self.history_slot(client_id).await? {
            return Ok(Some(slot.into_status()));
        }
        Ok(None)
    }

    async fn cancel(&self, client_id: &str, delete_files: bool) -> Result<(), AppError> {
        let del = if delete_files { "1" } else { "0" };
        let _: SabResult = self
            .call(
                "queue",
                &[("name", "delete"), ("value", client_id), ("del_files", del)],
            )
            .await?;
        // Finished jobs live in history; deleting there is how artifacts go away.
        let _: SabResult = self
            .call(
                "history",
                &[("name", "delete"), ("value", client_id), ("del_files", del)],
            )
            .await?;
        Ok(())
    }

    async fn version(&self) -> Result<String, AppError> {
        let response: SabVersionResponse = self.call("version", &[]).await?;
        Ok(response.version)
    }
}

#[derive(Debug, Deserialize)]
struct SabAddResponse {
    status: bool,
    #[serde(default)]
    nzo_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SabResult {
    #[allow(unused)]
    #[serde(default)]
    status: bool,
}

#[derive(Debug, Deserialize)]
struct SabVersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct SabQueueResponse {
    queue: SabQueue,
}

#[derive(Debug, Default, Deserialize)]
struct SabQueue {
    #[serde(default)]
    slots: Vec<SabQueueSlot>,
}

#[derive(Debug, Deserialize)]
struct SabQueueSlot {
    nzo_id: String,
    status: String,
    /// Percent complete as a string, e.g. "35.2"
    percentage: String,
    /// Total size in megabytes
    mb: String,
    mbleft: String,
    timeleft: String,
}

impl SabQueueSlot {
    fn into_status(self) -> ClientStatus {
        if self.status.eq_ignore_ascii_case("queued") {
            return ClientStatus::Queued;
        }
        let progress: f32 = self.percentage.parse().unwrap_or(0.0);
        let size_mb: f64 = self.mb.parse().unwrap_or(0.0);
        let left_mb: f64 = self.mbleft.parse().unwrap_or(0.0);
        let size_bytes = (size_mb * 1_048_576.0) as u64;
        let eta = parse_timeleft(&self.timeleft);
        let speed_bps = eta
            .filter(|eta| !eta.is_zero())
            .map(|eta| ((left_mb * 1_048_576.0) / eta.as_secs_f64()) as u64)
            .unwrap_or(0);
        ClientStatus::Downloading {
            progress,
            size_bytes,
            speed_bps,
            eta,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SabHistoryResponse {
    history: SabHistory,
}

#[derive(Debug, Default, Deserialize)]
struct SabHistory {
    #[serde(default)]
    slots: Vec<SabHistorySlot>,
}

#[derive(Debug, Deserialize)]
struct SabHistorySlot {
    nzo_id: String,
    status: String,
    /// Final path of the completed job
    #[serde(default)]
    storage: String,
    #[serde(default)]
    fail_message: String,
}

impl SabHistorySlot {
    fn into_status(self) -> ClientStatus {
        if self.status.eq_ignore_ascii_case("completed") {
            ClientStatus::Completed {
                path: PathBuf::from(self.storage),
            }
        } else {
            let reason = if self.fail_message.is_empty() {
                format!("downloader reported status {}", self.status)
            } else {
                self.fail_message
            };
            ClientStatus::Failed { reason }
        }
    }
}

/// SABnzbd reports time left as `H:MM:SS`.
fn parse_timeleft(timeleft: &str) -> Option<Duration> {
    let mut parts = timeleft.split(':').rev();
    let seconds: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    let hours: u64 = parts.next().and_then(|h| h.parse().ok()).unwrap_or(0);
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}
