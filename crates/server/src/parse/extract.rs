//! Document extraction backends.
//!
//! The cache only ever sees a callback producing raw markdown; this
//! module supplies the callback. [`HttpExtractor`] covers the built-in
//! cases: UTF-8 text and markdown uploads pass through, HTML (uploaded or
//! fetched) is converted to markdown. Anything richer plugs in behind
//! [`DocumentExtractor`].

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::Url;
use thiserror::Error;

const MAX_REDIRECTS: usize = 5;
const MAX_FETCH_BYTES: usize = 20 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

/// Errors produced by extraction backends.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input can never be extracted (bad scheme, private address,
    /// binary upload, unsupported content type). Maps to 400.
    #[error("unsupported document: {0}")]
    Unsupported(String),

    /// The backend failed; the input itself may be fine. Maps to 500.
    #[error("extraction failed: {0}")]
    Upstream(String),
}

/// Turns an upload or a URL into raw markdown.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_file(&self, filename: Option<&str>, bytes: &[u8])
    -> Result<String, ExtractError>;

    async fn extract_url(&self, url: &Url) -> Result<String, ExtractError>;
}

/// Reject URLs that must never be fetched: non-http(s) schemes and hosts
/// that resolve into the server's own network. Checked before the first
/// request and again on every redirect hop.
pub fn ensure_public_http_url(url: &Url) -> Result<(), ExtractError> {
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ExtractError::Unsupported(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }

    let private = match url.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost") || domain.ends_with(".local")
        }
        Some(url::Host::Ipv4(ip)) => ipv4_is_private(ip),
        Some(url::Host::Ipv6(ip)) => ipv6_is_private(ip),
        None => true,
    };
    if private {
        return Err(ExtractError::Unsupported(
            "url points to a private or local address".to_string(),
        ));
    }
    Ok(())
}

fn ipv4_is_private(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn ipv6_is_private(ip: Ipv6Addr) -> bool {
    // Unique-local fc00::/7 and link-local fe80::/10 checked by range;
    // the dedicated predicates are not yet stable on all supported
    // toolchains.
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00
        || (segments[0] & 0xffc0) == 0xfe80
        || ip.to_ipv4_mapped().is_some_and(ipv4_is_private)
}

/// Built-in extractor: reqwest fetch plus HTML-to-markdown conversion.
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl Default for HttpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExtractor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent("sidenote-parse/0.1")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build parse HTTP client");
        Self { client }
    }
}

fn strip_styles_and_scripts(html: &str) -> String {
    let style_re = Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex");
    let script_re = Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex");
    let without_styles = style_re.replace_all(html, "");
    let cleaned = script_re.replace_all(&without_styles, "");
    cleaned.to_string()
}

fn parse_content_type_header(response: &reqwest::Response) -> Result<String, ExtractError> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ExtractError::Upstream("missing or invalid Content-Type header".to_string()))?;

    header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .ok_or_else(|| ExtractError::Upstream("missing or invalid Content-Type header".to_string()))
}

fn is_html_content_type(content_type: &str) -> bool {
    content_type == "text/html" || content_type == "application/xhtml+xml"
}

fn is_allowed_text_content_type(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type.ends_with("+json")
        || content_type == "application/xml"
        || content_type.ends_with("+xml")
}

fn html_to_markdown(html: &str) -> String {
    let cleaned = strip_styles_and_scripts(html);
    html2md::parse_html(&cleaned, true)
}

async fn fetch_with_redirects(
    client: &reqwest::Client,
    url: &Url,
) -> Result<reqwest::Response, ExtractError> {
    let mut current = url.clone();
    ensure_public_http_url(&current)?;

    for hop in 0..=MAX_REDIRECTS {
        let resp = client.get(current.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractError::Upstream("request timed out after 20s".to_string())
            } else {
                ExtractError::Upstream(format!("request failed: {e}"))
            }
        })?;

        if resp.status().is_redirection() {
            let Some(loc) = resp.headers().get(reqwest::header::LOCATION) else {
                return Err(ExtractError::Upstream(
                    "redirect response missing Location header".to_string(),
                ));
            };
            let loc = loc.to_str().map_err(|e| {
                ExtractError::Upstream(format!("invalid redirect Location header: {e}"))
            })?;

            if hop == MAX_REDIRECTS {
                return Err(ExtractError::Upstream(format!(
                    "too many redirects (max {MAX_REDIRECTS})"
                )));
            }

            current = current.join(loc).map_err(|e| {
                ExtractError::Upstream(format!("failed to resolve redirect location '{loc}': {e}"))
            })?;
            ensure_public_http_url(&current)?;
            continue;
        }

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream(format!(
                "http error {}",
                resp.status().as_u16()
            )));
        }

        return Ok(resp);
    }

    Err(ExtractError::Upstream("unreachable redirect state".to_string()))
}

#[async_trait]
impl DocumentExtractor for HttpExtractor {
    async fn extract_file(
        &self,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<String, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|_| {
            ExtractError::Unsupported("binary uploads are not supported".to_string())
        })?;

        let extension = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("html") | Some("htm") | Some("xhtml") => Ok(html_to_markdown(text)),
            _ => Ok(text.to_string()),
        }
    }

    async fn extract_url(&self, url: &Url) -> Result<String, ExtractError> {
        let response = fetch_with_redirects(&self.client, url).await?;
        let content_type = parse_content_type_header(&response)?;

        if !is_html_content_type(&content_type) && !is_allowed_text_content_type(&content_type) {
            return Err(ExtractError::Unsupported(format!(
                "unsupported content-type: {content_type}"
            )));
        }

        let mut buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ExtractError::Upstream(format!("failed to read response body: {e}"))
            })?;
            if buf.len() + chunk.len() > MAX_FETCH_BYTES {
                return Err(ExtractError::Upstream(format!(
                    "response exceeded max bytes ({MAX_FETCH_BYTES})"
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&buf).into_owned();
        if is_html_content_type(&content_type) {
            Ok(html_to_markdown(&body))
        } else {
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn accepts_public_http_urls() {
        assert!(ensure_public_http_url(&url("https://example.com/doc")).is_ok());
        assert!(ensure_public_http_url(&url("http://93.184.216.34/doc")).is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(ensure_public_http_url(&url("ftp://example.com/doc")).is_err());
        assert!(ensure_public_http_url(&url("file:///etc/passwd")).is_err());
    }

    #[test]
    fn rejects_local_and_private_hosts() {
        for candidate in [
            "http://localhost/doc",
            "http://sub.localhost/doc",
            "http://printer.local/doc",
            "http://127.0.0.1/doc",
            "http://10.0.0.8/doc",
            "http://172.16.4.2/doc",
            "http://192.168.1.1/doc",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/doc",
            "http://[::1]/doc",
            "http://[fc00::1]/doc",
            "http://[fe80::1]/doc",
            "http://[::ffff:10.0.0.8]/doc",
        ] {
            assert!(
                ensure_public_http_url(&url(candidate)).is_err(),
                "expected rejection for {candidate}"
            );
        }
    }

    #[test]
    fn strips_style_and_script_tags() {
        let html = "<html><head><style>body{color:red}</style><script>alert(1)</script></head><body><h1>Hi</h1></body></html>";
        let cleaned = strip_styles_and_scripts(html);
        assert!(!cleaned.contains("style"));
        assert!(!cleaned.contains("script"));
        assert!(cleaned.contains("<h1>Hi</h1>"));
    }

    #[test]
    fn recognizes_content_types() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("text/plain"));
        assert!(is_allowed_text_content_type("text/plain"));
        assert!(is_allowed_text_content_type("application/ld+json"));
        assert!(!is_allowed_text_content_type("application/octet-stream"));
    }

    #[tokio::test]
    async fn file_extraction_passes_markdown_through() {
        let extractor = HttpExtractor::new();
        let markdown = extractor
            .extract_file(Some("notes.md"), b"# Title\n\nbody")
            .await
            .unwrap();
        assert_eq!(markdown, "# Title\n\nbody");
    }

    #[tokio::test]
    async fn file_extraction_rejects_binary() {
        let extractor = HttpExtractor::new();
        let result = extractor
            .extract_file(Some("image.png"), &[0x89, 0x50, 0x4e, 0x47, 0x00, 0xff])
            .await;
        assert!(matches!(result, Err(ExtractError::Unsupported(_))));
    }
}
