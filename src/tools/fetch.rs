//! 页面抓取：可选域名白名单、超时、结果大小限制
//!
//! GET 请求带超时与浏览器 User-Agent；响应超过 max_chars 时截断并追加 ...[truncated]。
//! 对 HTML 响应使用 html2text 提取可读文本，失败时回退到简单去标签。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;

use crate::core::ResearchError;
use crate::tools::PageFetcher;

// 使用现代浏览器 UA 与常用请求头，避免被站点识别为爬虫
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(15).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head") || s.contains("<title")))
}

/// 从 URL 中提取 host（小写，不含端口）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = url.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

/// 网页抓取器
pub struct WebFetcher {
    client: Client,
    /// 为空表示不限制域名
    allowed_domains: HashSet<String>,
    max_chars: usize,
}

impl WebFetcher {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_chars: usize) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"));
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_chars: max_chars.max(1),
        }
    }

    fn check_allowed(&self, url: &str) -> Result<(), ResearchError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ResearchError::Fetch(format!("Invalid or missing URL: {}", url)))?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(ResearchError::Fetch(format!("Domain not in allowlist: {}", domain)))
    }

    /// 将 HTML 转为可读文本（去除 script/style 等）
    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_chars {
            body.chars().take(self.max_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }
}

#[async_trait]
impl PageFetcher for WebFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, ResearchError> {
        self.check_allowed(url)?;
        tracing::info!(url = %url, "fetch page");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResearchError::Fetch(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ResearchError::Fetch(format!("HTTP {} for {}", resp.status(), url)));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ResearchError::Fetch(format!("Read body: {}", e)))?;

        // 去除 BOM，避免 HTML 检测失败
        let body = body.strip_prefix('\u{FEFF}').unwrap_or(&body);

        let text = if looks_like_html(body) {
            self.html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(self.truncate(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://En.Wikipedia.org:443/wiki/France"),
            Some("en.wikipedia.org".to_string())
        );
        assert_eq!(extract_domain("http://a.com?x=1"), Some("a.com".to_string()));
        assert_eq!(extract_domain("ftp://a.com"), None);
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("<p>Paris</p><p>France</p>"), "Paris France");
    }

    #[test]
    fn test_allowlist() {
        let fetcher = WebFetcher::new(vec!["en.wikipedia.org".into()], 5, 100);
        assert!(fetcher.check_allowed("https://en.wikipedia.org/wiki/Paris").is_ok());
        assert!(fetcher.check_allowed("https://evil.example/").is_err());
        let open = WebFetcher::new(vec![], 5, 100);
        assert!(open.check_allowed("https://anything.example/").is_ok());
    }

    #[tokio::test]
    async fn test_fetch_html_is_converted_and_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/france"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<!DOCTYPE html><html><head><title>France</title></head><body><p>Paris is the capital of France.</p></body></html>",
            ))
            .mount(&server)
            .await;

        let fetcher = WebFetcher::new(vec![], 5, 10_000);
        let text = fetcher
            .fetch_page(&format!("{}/france", server.uri()))
            .await
            .unwrap();
        assert!(text.contains("Paris is the capital of France."));
        assert!(!text.contains("<p>"));

        let short = WebFetcher::new(vec![], 5, 5);
        let text = short
            .fetch_page(&format!("{}/france", server.uri()))
            .await
            .unwrap();
        assert!(text.ends_with("...[truncated]"));
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let fetcher = WebFetcher::new(vec![], 5, 100);
        let err = fetcher.fetch_page(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ResearchError::Fetch(_)));
    }
}
