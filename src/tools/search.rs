//! Serper 网页搜索
//!
//! POST {endpoint}，请求头 X-API-KEY，请求体 {"q": query, "num": n}；
//! 响应的 organic[] 映射为 SearchHit（保持原始排名顺序）。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::{ResearchError, SearchHit};
use crate::tools::SearchProvider;

pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Serper 搜索客户端
pub struct SerperSearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl SerperSearch {
    pub fn new(endpoint: Option<&str>, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("SERPER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.unwrap_or(SERPER_ENDPOINT).to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>, ResearchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ResearchError::Search("SERPER_API_KEY not set".to_string()))?;

        tracing::info!(query = %query, n, "web search");
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query, "num": n }))
            .send()
            .await
            .map_err(|e| ResearchError::Search(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ResearchError::Search(format!("HTTP {}", resp.status())));
        }
        let body: SerperResponse = resp
            .json()
            .await
            .map_err(|e| ResearchError::Search(format!("Invalid response: {}", e)))?;

        Ok(body
            .organic
            .into_iter()
            .filter(|o| !o.link.trim().is_empty())
            .take(n)
            .map(|o| SearchHit {
                title: o.title.trim().to_string(),
                url: o.link.trim().to_string(),
                snippet: o.snippet.trim().to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_serper_maps_organic_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-API-KEY", "test-key"))
            .and(body_partial_json(json!({ "q": "capital of france" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    { "title": "France", "link": "https://en.wikipedia.org/wiki/France", "snippet": "Paris" },
                    { "title": "No link" },
                    { "title": "Paris", "link": "https://en.wikipedia.org/wiki/Paris", "snippet": "City" }
                ]
            })))
            .mount(&server)
            .await;

        let search = SerperSearch::new(Some(&server.uri()), Some("test-key"), 5);
        let hits = search.search("capital of france", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://en.wikipedia.org/wiki/France");
        assert_eq!(hits[1].title, "Paris");
    }

    #[tokio::test]
    async fn test_serper_http_error_is_search_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let search = SerperSearch::new(Some(&server.uri()), Some("bad"), 5);
        let err = search.search("q", 5).await.unwrap_err();
        assert!(matches!(err, ResearchError::Search(_)));
    }
}
