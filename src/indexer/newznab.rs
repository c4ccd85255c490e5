use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use super::{Indexer, ProspectRelease, SearchRequest};
use crate::app_state::AppError;
use crate::db::ContentType;
use crate::request_client::UpstreamClient;

/// Newznab category roots: movies live under 2000, series under 5000.
const MOVIE_CATEGORIES: &str = "2000";
const SERIES_CATEGORIES: &str = "5000";

/// Client for a Newznab-compatible search endpoint.
#[derive(Debug)]
pub struct NewznabApi {
    name: String,
    base_url: Url,
    api_key: Option<String>,
    client: UpstreamClient,
}

impl NewznabApi {
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        api_key: Option<String>,
        deadline: Duration,
    ) -> Self {
        let client = UpstreamClient::new(Client::new(), 2, Duration::from_secs(1), deadline);
        Self {
            name: name.into(),
            base_url,
            api_key,
            client,
        }
    }

    fn search_url(&self, request: &SearchRequest) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("indexer url is a valid base")
            .push("api");
        {
            let mut query = url.query_pairs_mut();
            match (request.content_type, &request.imdb_id, request.tvdb_id) {
                (ContentType::Movie, Some(imdb), _) => {
                    query.append_pair("t", "movie");
                    query.append_pair("imdbid", imdb.trim_start_matches("tt"));
                }
                (ContentType::Series, _, Some(tvdb)) => {
                    query.append_pair("t", "tvsearch");
                    query.append_pair("tvdbid", &tvdb.to_string());
                }
                _ => {
                    query.append_pair("t", "search");
                }
            }
            query.append_pair("q", &request.text);
            let categories = match request.content_type {
                ContentType::Movie => MOVIE_CATEGORIES,
                ContentType::Series => SERIES_CATEGORIES,
            };
            query.append_pair("cat", categories);
            query.append_pair("o", "json");
            if let Some(key) = &self.api_key {
                query.append_pair("apikey", key);
            }
        }
        url
    }
}

#[async_trait::async_trait]
impl Indexer for NewznabApi {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError> {
        let url = self.search_url(request);
        let response: NewznabResponse = self.client.json(Request::new(Method::GET, url)).await?;
        let items = response.channel.map(|c| c.item).unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|item| item.into_release(&self.name))
            .collect())
    }

    fn indexer_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct NewznabResponse {
    channel: Option<NewznabChannel>,
}

#[derive(Debug, Deserialize)]
struct NewznabChannel {
    #[serde(default)]
    item: Vec<NewznabItem>,
}

#[derive(Debug, Deserialize)]
struct NewznabItem {
    title: String,
    guid: String,
    link: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

impl NewznabItem {
    fn into_release(self, indexer: &str) -> ProspectRelease {
        let published = self
            .pub_date
            .as_deref()
            .and_then(|d| OffsetDateTime::parse(d, &Rfc2822).ok());
        ProspectRelease {
            title: self.title,
            guid: self.guid,
            download_url: self.link,
            size: self.size.unwrap_or(0),
            published,
            indexer: indexer.to_string(),
        }
    }
}
