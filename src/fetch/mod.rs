//! Fetch primitive: the boundary the HTTP orchestrator drives.
//!
//! `Fetcher` is the contract; `HttpFetcher` is the reqwest-backed default.
//! Result order need not match input order.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use crate::models::{Persona, Proxy};

/// Per-domain outcome of a bulk fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub domain: String,
    pub is_success: bool,
    /// Validator status string, e.g. "Validated" or "FetchError".
    pub status: String,
    pub status_code: i64,
    pub error: String,
    pub final_url: String,
    pub raw_body: String,
    pub extracted_title: String,
    pub extracted_content_snippet: String,
    pub content_length: i64,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch all domains with at most `concurrency` requests in flight.
    async fn fetch_bulk(
        &self,
        domains: &[String],
        concurrency: usize,
        persona: Option<&Persona>,
        proxy: Option<&Proxy>,
    ) -> Vec<FetchResult>;

    /// Fetch a single absolute URL, reading at most `max_bytes` of body.
    /// Used by the micro-crawl for secondary pages.
    async fn fetch_page(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<String, String>;
}

const SNIPPET_LEN: usize = 512;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; dragnet/0.1)";

/// reqwest-backed fetcher. Builds one client per (persona, proxy) pair at
/// call time; personas supply headers, proxies supply egress.
pub struct HttpFetcher {
    request_timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    fn build_client(
        &self,
        persona: Option<&Persona>,
        proxy: Option<&Proxy>,
    ) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(
                persona
                    .map(|p| p.user_agent.clone())
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .redirect(reqwest::redirect::Policy::limited(5));
        if let Some(proxy) = proxy
            && let Ok(p) = reqwest::Proxy::all(&proxy.url)
        {
            builder = builder.proxy(p);
        }
        if let Some(lang) = persona.and_then(|p| p.accept_language.as_deref()) {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(lang) {
                headers.insert(reqwest::header::ACCEPT_LANGUAGE, value);
            }
            builder = builder.default_headers(headers);
        }
        builder.build()
    }

    async fn fetch_one(client: &reqwest::Client, domain: &str) -> FetchResult {
        let url = format!("https://{}/", domain);
        match client.get(&url).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16() as i64;
                let final_url = response.url().to_string();
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        return FetchResult {
                            domain: domain.to_string(),
                            status: "FetchError".to_string(),
                            status_code,
                            error: e.to_string(),
                            final_url,
                            ..Default::default()
                        };
                    }
                };
                let is_success = (200..400).contains(&status_code);
                FetchResult {
                    domain: domain.to_string(),
                    is_success,
                    status: if is_success { "Validated" } else { "StatusCodeMismatch" }.to_string(),
                    status_code,
                    error: String::new(),
                    final_url,
                    extracted_title: extract_title(&body),
                    extracted_content_snippet: extract_snippet(&body),
                    content_length: body.len() as i64,
                    raw_body: body,
                }
            }
            Err(e) => {
                let status = if e.is_timeout() { "HeadlessTimeout" } else { "FetchError" };
                FetchResult {
                    domain: domain.to_string(),
                    status: status.to_string(),
                    error: e.to_string(),
                    ..Default::default()
                }
            }
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_bulk(
        &self,
        domains: &[String],
        concurrency: usize,
        persona: Option<&Persona>,
        proxy: Option<&Proxy>,
    ) -> Vec<FetchResult> {
        let client = match self.build_client(persona, proxy) {
            Ok(client) => client,
            Err(e) => {
                let error = e.to_string();
                return domains
                    .iter()
                    .map(|d| FetchResult {
                        domain: d.clone(),
                        status: "FetchError".to_string(),
                        error: error.clone(),
                        ..Default::default()
                    })
                    .collect();
            }
        };

        stream::iter(domains.iter().cloned())
            .map(|domain| {
                let client = client.clone();
                async move { Self::fetch_one(&client, &domain).await }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    async fn fetch_page(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<String, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| e.to_string())?;
        let response = client.get(url).send().await.map_err(|e| e.to_string())?;
        let body = response.text().await.map_err(|e| e.to_string())?;
        // Truncate to the remaining byte budget on a char boundary.
        if body.len() > max_bytes {
            let mut cut = max_bytes;
            while cut > 0 && !body.is_char_boundary(cut) {
                cut -= 1;
            }
            Ok(body[..cut].to_string())
        } else {
            Ok(body)
        }
    }
}

fn title_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap())
}

/// Pull the first `<title>` text out of an HTML body.
pub fn extract_title(body: &str) -> String {
    title_regex()
        .captures(body)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default()
}

/// First few hundred characters of tag-stripped text content.
pub fn extract_snippet(body: &str) -> String {
    let mut text = String::with_capacity(SNIPPET_LEN);
    let mut in_tag = false;
    let mut last_space = false;
    for c in body.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => {
                if c.is_whitespace() {
                    if !last_space && !text.is_empty() {
                        text.push(' ');
                        last_space = true;
                    }
                } else {
                    text.push(c);
                    last_space = false;
                }
                if text.len() >= SNIPPET_LEN {
                    break;
                }
            }
            _ => {}
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title() {
        let body = "<html><head><TITLE>Acme Plumbing</TITLE></head><body></body></html>";
        assert_eq!(extract_title(body), "Acme Plumbing");
        assert_eq!(extract_title("<html><body>no title</body></html>"), "");
    }

    #[test]
    fn extracts_title_with_attributes() {
        let body = r#"<title lang="en"> Spaced Out </title>"#;
        assert_eq!(extract_title(body), "Spaced Out");
    }

    #[test]
    fn snippet_strips_tags_and_collapses_whitespace() {
        let body = "<p>Hello   <b>world</b>,\n  welcome</p>";
        assert_eq!(extract_snippet(body), "Hello world, welcome");
    }

    #[test]
    fn snippet_is_bounded() {
        let body = format!("<p>{}</p>", "x".repeat(5000));
        assert!(extract_snippet(&body).len() <= SNIPPET_LEN + 1);
    }

    #[tokio::test]
    async fn bulk_fetch_of_unresolvable_domain_reports_error() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_millis(200));
        let results = fetcher
            .fetch_bulk(
                &["invalid.invalid".to_string()],
                4,
                None,
                None,
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_success);
        assert!(!results[0].error.is_empty() || results[0].status == "FetchError");
    }
}
