use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::{CatalogPage, MovieDetail, MovieRecord};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn discover(&self, params: &DiscoverParams) -> Result<CatalogPage>;
    async fn search(&self, query: &str, page: u32) -> Result<CatalogPage>;
    async fn fetch_movie(&self, id: i32) -> Result<MovieRecord>;
}

/// Query parameters of a `discover/movie` request. `None` fields are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverParams {
    pub with_genres: Option<String>,
    pub release_date_gte: Option<String>,
    pub release_date_lte: Option<String>,
    pub vote_average_gte: Option<f64>,
    pub vote_average_lte: Option<f64>,
    pub sort_by: Option<&'static str>,
    pub page: u32,
}

impl DiscoverParams {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(g) = &self.with_genres {
            pairs.push(("with_genres", g.clone()));
        }
        if let Some(d) = &self.release_date_gte {
            pairs.push(("primary_release_date.gte", d.clone()));
        }
        if let Some(d) = &self.release_date_lte {
            pairs.push(("primary_release_date.lte", d.clone()));
        }
        if let Some(v) = self.vote_average_gte {
            pairs.push(("vote_average.gte", v.to_string()));
        }
        if let Some(v) = self.vote_average_lte {
            pairs.push(("vote_average.lte", v.to_string()));
        }
        if let Some(s) = self.sort_by {
            pairs.push(("sort_by", s.to_string()));
        }
        pairs.push(("page", self.page.to_string()));
        pairs
    }
}

/// A translated list request: free-text search bypasses every other filter.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRequest {
    Discover(DiscoverParams),
    Search { query: String, page: u32 },
}

impl CatalogRequest {
    pub fn page(&self) -> u32 {
        match self {
            CatalogRequest::Discover(p) => p.page,
            CatalogRequest::Search { page, .. } => *page,
        }
    }

    pub async fn send(&self, catalog: &dyn CatalogApi) -> Result<CatalogPage> {
        match self {
            CatalogRequest::Discover(params) => catalog.discover(params).await,
            CatalogRequest::Search { query, page } => catalog.search(query, *page).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let user_agent = format!("watchlist/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.tmdb_api_key.clone(), config.tmdb_base_url.clone())
    }

    fn url(&self, path: &str, pairs: &[(&str, String)]) -> String {
        let mut url = format!("{}/{path}?api_key={}", self.base_url, self.api_key);
        for (key, value) in pairs {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn redact<'a>(&self, url: &'a str) -> std::borrow::Cow<'a, str> {
        if self.api_key.is_empty() {
            return url.into();
        }
        url.replace(&self.api_key, "***").into()
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
            return Err(anyhow!("{} -> {} {}", self.redact(url), status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn discover(&self, params: &DiscoverParams) -> Result<CatalogPage> {
        let url = self.url("discover/movie", &params.query_pairs());
        tracing::debug!(url = %self.redact(&url), "discover request");
        self.get_json(&url).await
    }

    async fn search(&self, query: &str, page: u32) -> Result<CatalogPage> {
        let url = self.url(
            "search/movie",
            &[("query", query.to_string()), ("page", page.to_string())],
        );
        tracing::debug!(url = %self.redact(&url), "search request");
        self.get_json(&url).await
    }

    async fn fetch_movie(&self, id: i32) -> Result<MovieRecord> {
        let url = self.url(&format!("movie/{id}"), &[]);
        let detail: MovieDetail = self
            .get_json(&url)
            .await
            .with_context(|| format!("detail lookup for movie {id}"))?;
        Ok(detail.into_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn page_body() -> &'static str {
        r#"{
            "page": 2,
            "total_pages": 7,
            "total_results": 140,
            "results": [
                {"id": 1, "title": "One", "release_date": "2001-01-01", "poster_path": "/1.jpg", "genre_ids": [28], "vote_average": 7.1},
                {"id": 2, "title": "Two", "release_date": "", "poster_path": null, "genre_ids": [], "vote_average": 6.0}
            ]
        }"#
    }

    #[test]
    fn query_pairs_omit_absent_fields() {
        let params = DiscoverParams {
            with_genres: Some("28,18".to_string()),
            release_date_gte: Some("1990-01-01".to_string()),
            vote_average_gte: Some(7.5),
            page: 3,
            ..Default::default()
        };
        assert_eq!(
            params.query_pairs(),
            vec![
                ("with_genres", "28,18".to_string()),
                ("primary_release_date.gte", "1990-01-01".to_string()),
                ("vote_average.gte", "7.5".to_string()),
                ("page", "3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn discover_sends_translated_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/discover/movie")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api_key".into(), "k".into()),
                Matcher::UrlEncoded("with_genres".into(), "28,18".into()),
                Matcher::UrlEncoded("sort_by".into(), "vote_average.desc".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body())
            .create_async()
            .await;

        let client = TmdbClient::new("k", server.url()).expect("client");
        let params = DiscoverParams {
            with_genres: Some("28,18".to_string()),
            sort_by: Some("vote_average.desc"),
            page: 2,
            ..Default::default()
        };
        let page = client.discover(&params).await.expect("discover");
        mock.assert_async().await;
        assert_eq!(page.page, 2);
        assert_eq!(page.total_pages, 7);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[1].poster_path, "");
    }

    #[tokio::test]
    async fn search_encodes_query_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/movie")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "blade runner & co".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(page_body())
            .create_async()
            .await;

        let client = TmdbClient::new("k", server.url()).expect("client");
        client.search("blade runner & co", 1).await.expect("search");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_without_api_key() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/movie/42")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"status_message":"Invalid API key"}"#)
            .create_async()
            .await;

        let client = TmdbClient::new("secret-key", server.url()).expect("client");
        let err = client.fetch_movie(42).await.expect_err("should fail");
        let msg = format!("{err:#}");
        assert!(msg.contains("Invalid API key"));
        assert!(!msg.contains("secret-key"));
    }

    #[tokio::test]
    async fn fetch_movie_maps_detail_genres() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/movie/27205")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"id": 27205, "title": "Inception", "release_date": "2010-07-15",
                    "poster_path": "/i.jpg", "genres": [{"id": 28, "name": "Action"}],
                    "vote_average": 8.4}"#,
            )
            .create_async()
            .await;

        let client = TmdbClient::new("k", server.url()).expect("client");
        let movie = client.fetch_movie(27205).await.expect("detail");
        assert_eq!(movie.genre_ids, vec![28]);
        assert_eq!(movie.title, "Inception");
    }
}
