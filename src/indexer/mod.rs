use std::{sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinSet;

use crate::app_state::AppError;
use crate::db::ContentType;

pub mod newznab;

/// A single downloadable artifact as reported by an upstream indexer.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ProspectRelease {
    pub title: String,
    pub guid: String,
    pub download_url: String,
    pub size: u64,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    pub indexer: String,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: String,
    pub content_type: ContentType,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
}

/// One failing indexer never poisons a search; it shows up here instead.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct IndexerError {
    pub indexer: String,
    pub error: String,
}

#[async_trait::async_trait]
pub trait Indexer: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError>;
    fn indexer_name(&self) -> &str;
}

/// Fans a query out to every configured indexer concurrently.
#[derive(Clone)]
pub struct IndexerPool {
    indexers: Vec<Arc<dyn Indexer>>,
    call_deadline: Duration,
}

impl std::fmt::Debug for IndexerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerPool")
            .field("indexers", &self.indexer_names())
            .finish()
    }
}

/// Some indexers choke on punctuation; give them the plainest query text.
pub fn normalize_query(text: &str) -> String {
    text.replace('&', "and")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl IndexerPool {
    pub fn new(indexers: Vec<Arc<dyn Indexer>>, call_deadline: Duration) -> Self {
        Self {
            indexers,
            call_deadline,
        }
    }

    pub fn indexer_names(&self) -> Vec<String> {
        self.indexers
            .iter()
            .map(|i| i.indexer_name().to_string())
            .collect()
    }

    /// Query every indexer; a slow or failing one only costs its own slot.
    /// Fails outright only when nothing is configured.
    pub async fn search(
        &self,
        mut request: SearchRequest,
    ) -> Result<(Vec<ProspectRelease>, Vec<IndexerError>), AppError> {
        if self.indexers.is_empty() {
            return Err(AppError::bad_request("no indexers are configured"));
        }
        request.text = normalize_query(&request.text);
        let request = Arc::new(request);

        let mut handles: JoinSet<(String, Result<Vec<ProspectRelease>, String>)> = JoinSet::new();
        for indexer in &self.indexers {
            let indexer = indexer.clone();
            let request = request.clone();
            let deadline = self.call_deadline;
            handles.spawn(async move {
                let name = indexer.indexer_name().to_string();
                let result = match tokio::time::timeout(deadline, indexer.search(&request)).await {
                    Ok(Ok(releases)) => Ok(releases),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {deadline:?}")),
                };
                (name, result)
            });
        }

        let mut releases = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = handles.join_next().await {
            match joined {
                Ok((_, Ok(found))) => releases.extend(found),
                Ok((indexer, Err(error))) => {
                    tracing::warn!(indexer, "Indexer search failed: {error}");
                    errors.push(IndexerError { indexer, error });
                }
                Err(e) => {
                    tracing::error!("Indexer search task panicked: {e}");
                }
            }
        }
        Ok((releases, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticIndexer {
        name: &'static str,
        releases: Vec<ProspectRelease>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Indexer for StaticIndexer {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError> {
            if self.fail {
                Err(AppError::internal_error("upstream responded with status 500"))
            } else {
                Ok(self.releases.clone())
            }
        }

        fn indexer_name(&self) -> &str {
            self.name
        }
    }

    fn release(title: &str, indexer: &str) -> ProspectRelease {
        ProspectRelease {
            title: title.to_string(),
            guid: format!("{indexer}-{title}"),
            download_url: format!("https://{indexer}.test/{title}"),
            size: 1024,
            published: None,
            indexer: indexer.to_string(),
        }
    }

    fn request() -> SearchRequest {
        SearchRequest {
            text: "test movie".into(),
            content_type: ContentType::Movie,
            imdb_id: None,
            tvdb_id: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn partial_failure_keeps_results() {
        let pool = IndexerPool::new(
            vec![
                Arc::new(StaticIndexer {
                    name: "alpha",
                    releases: vec![release("a", "alpha"), release("b", "alpha")],
                    fail: false,
                }),
                Arc::new(StaticIndexer {
                    name: "broken",
                    releases: vec![],
                    fail: true,
                }),
                Arc::new(StaticIndexer {
                    name: "empty",
                    releases: vec![],
                    fail: false,
                }),
            ],
            Duration::from_secs(5),
        );
        let (releases, errors) = pool.search(request()).await.unwrap();
        assert_eq!(2, releases.len());
        assert_eq!(1, errors.len());
        assert_eq!("broken", errors[0].indexer);
    }

    #[test_log::test(tokio::test)]
    async fn no_indexers_is_an_error() {
        let pool = IndexerPool::new(vec![], Duration::from_secs(5));
        assert!(pool.search(request()).await.is_err());
    }

    #[test]
    fn query_normalization() {
        assert_eq!("tom and jerry", normalize_query("Tom & Jerry".to_lowercase().as_str()));
        assert_eq!("a b c", normalize_query("  a   b  c "));
    }
}
