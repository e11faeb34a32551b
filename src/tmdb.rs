use crate::config::Config;
use crate::media::{MediaItem, MediaType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const LANGUAGE: &str = "en-US";

/// The three search endpoints fanned out by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    Multi,
    Movie,
    Tv,
}

impl SearchScope {
    pub fn endpoint(&self) -> &'static str {
        match self {
            SearchScope::Multi => "search/multi",
            SearchScope::Movie => "search/movie",
            SearchScope::Tv => "search/tv",
        }
    }
}

pub fn recommendations_endpoint(kind: MediaType, id: i64) -> String {
    format!("{kind}/{id}/recommendations")
}

#[async_trait]
pub trait TmdbApi: Send + Sync {
    /// Fetch a list endpoint such as `movie/popular` or
    /// `discover/movie?with_genres=35`.
    async fn fetch_list(&self, endpoint: &str) -> Result<Vec<MediaItem>>;
    async fn search(&self, scope: SearchScope, query: &str) -> Result<Vec<MediaItem>>;
    async fn recommendations(&self, kind: MediaType, id: i64) -> Result<Vec<MediaItem>>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<MediaItem>,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tmdb_api_key.clone(), config.tmdb_base_url.clone())
    }

    /// Build the request URL for an endpoint that may already carry its own
    /// query string.
    fn url(&self, endpoint: &str, extra: Option<(&str, &str)>) -> String {
        let sep = if endpoint.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}/{}{sep}api_key={}&language={LANGUAGE}",
            self.base_url,
            endpoint.trim_start_matches('/'),
            urlencoding::encode(&self.api_key)
        );
        if let Some((key, value)) = extra {
            url.push_str(&format!("&{key}={}", urlencoding::encode(value)));
        }
        url
    }

    async fn get_results(&self, url: &str) -> Result<Vec<MediaItem>> {
        let page: ResultsPage = self.get_json(url).await?;
        Ok(page.results)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {}", redact(url), text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn fetch_list(&self, endpoint: &str) -> Result<Vec<MediaItem>> {
        debug!("Fetching catalog list {}", endpoint);
        self.get_results(&self.url(endpoint, None)).await
    }

    async fn search(&self, scope: SearchScope, query: &str) -> Result<Vec<MediaItem>> {
        let url = self.url(scope.endpoint(), Some(("query", query)));
        self.get_results(&url).await
    }

    async fn recommendations(&self, kind: MediaType, id: i64) -> Result<Vec<MediaItem>> {
        let url = self.url(&recommendations_endpoint(kind, id), None);
        self.get_results(&url).await
    }
}

/// Strip the credential from a URL before it ends up in an error message.
fn redact(url: &str) -> String {
    match url.find("api_key=") {
        Some(start) => {
            let value_start = start + "api_key=".len();
            let end = url[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[end..])
        }
        None => url.to_string(),
    }
}
