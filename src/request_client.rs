use std::{sync::Arc, time::Duration};

use anyhow::Context;
use reqwest::{Client, Request, Response};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::app_state::AppError;

/// Request waiting in the rate-limit queue.
#[derive(Debug)]
struct QueuedRequest {
    req: Request,
    res: oneshot::Sender<reqwest::Result<Response>>,
    /// Lets abandoned callers evaporate from the queue instead of burning
    /// rate-limit budget.
    cancellation_token: CancellationToken,
}

/// Rate limited HTTP client shared by everything talking to one upstream.
///
/// Cloned instances share the limit. Every call carries a hard deadline;
/// a stalled upstream costs the caller at most `deadline`.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    request_tx: mpsc::Sender<QueuedRequest>,
    deadline: Duration,
}

impl UpstreamClient {
    /// `limit` requests per `rate` window, each individual call bounded by
    /// `deadline`.
    pub fn new(client: Client, limit: usize, rate: Duration, deadline: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedRequest>(100);
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(limit));
            while let Some(queued) = rx.recv().await {
                let semaphore = semaphore.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    let QueuedRequest {
                        req,
                        res,
                        cancellation_token,
                    } = queued;
                    let permit = tokio::select! {
                        biased;
                        _ = cancellation_token.cancelled() => return,
                        Ok(permit) = semaphore.acquire() => permit,
                    };
                    tokio::select! {
                        response = client.execute(req) => {
                            if res.send(response).is_err() {
                                tracing::trace!("Response receiver dropped");
                            }
                        },
                        _ = cancellation_token.cancelled() => {}
                    }
                    tokio::time::sleep(rate).await;
                    drop(permit);
                });
            }
        });
        Self {
            request_tx: tx,
            deadline,
        }
    }

    pub async fn json<T>(&self, req: Request) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let url = req.url().to_string();
        let response = self.request(req).await?;
        response.json().await.map_err(|e| {
            tracing::error!(url, "Failed to deserialize upstream response: {e}");
            AppError::internal_error("upstream returned malformed json")
        })
    }

    pub async fn request(&self, req: Request) -> Result<Response, AppError> {
        let url = req.url().to_string();
        match tokio::time::timeout(self.deadline, self.request_inner(req)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url, "Upstream call exceeded {:?}", self.deadline);
                Err(AppError::internal_error("upstream call timed out"))
            }
        }
    }

    async fn request_inner(&self, req: Request) -> Result<Response, AppError> {
        let (tx, rx) = oneshot::channel();
        let cancellation_token = CancellationToken::new();
        // Dropped when the caller gives up; pending queue entries die with it.
        let _guard = cancellation_token.clone().drop_guard();
        let url = req.url().to_string();
        self.request_tx
            .send(QueuedRequest {
                req,
                res: tx,
                cancellation_token,
            })
            .await
            .context("request queue closed")?;
        let response = rx
            .await
            .map_err(|e| anyhow::anyhow!("response channel dropped: {e}"))?
            .map_err(|e| {
                tracing::warn!(url, "Upstream request failed: {e}");
                anyhow::anyhow!("upstream request failed: {e}")
            })?;
        tracing::trace!(status = response.status().as_u16(), url, "Upstream response");
        match response.status().as_u16() {
            200..=299 => Ok(response),
            401 | 403 => Err(AppError::bad_request("upstream rejected credentials")),
            404 => Err(AppError::not_found("upstream resource not found")),
            status => Err(anyhow::anyhow!("upstream responded with status {status}").into()),
        }
    }
}
