use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use tracing::debug;

use pitchlens_core::config::FetchConfig;
use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::PageFetcher;

/// Plain HTTP page fetcher. HTML is reduced to text and truncated.
pub struct HttpFetcher {
    http: reqwest::Client,
    max_length: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| PitchlensError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            max_length: config.max_length,
        })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<String>> {
        let url = url.to_string();
        Box::pin(async move {
            debug!(url = %url, "Fetching page");

            let fetch_err = |message: String| PitchlensError::Fetch {
                url: url.clone(),
                message,
            };

            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| fetch_err(format!("Request failed: {}", e)))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(fetch_err(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }

            let content_type = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let body = resp
                .text()
                .await
                .map_err(|e| fetch_err(format!("Failed to read response body: {}", e)))?;

            let text = if content_type.contains("html") {
                strip_html_tags(&body)
            } else {
                body
            };

            Ok(truncate(text, self.max_length))
        })
    }
}

fn truncate(text: String, max_length: usize) -> String {
    if text.len() <= max_length {
        return text;
    }
    let mut cut = max_length;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n\n[truncated at {} chars]", &text[..cut], max_length)
}

struct HtmlPatterns {
    script: Regex,
    style: Regex,
    tags: Regex,
    blank_lines: Regex,
}

fn patterns() -> &'static HtmlPatterns {
    static PATTERNS: OnceLock<HtmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HtmlPatterns {
        script: Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap(),
        style: Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap(),
        tags: Regex::new(r"<[^>]+>").unwrap(),
        blank_lines: Regex::new(r"\n\s*\n(\s*\n)+").unwrap(),
    })
}

/// Basic HTML tag stripping using regex.
pub fn strip_html_tags(html: &str) -> String {
    let p = patterns();
    // Remove script and style blocks entirely
    let cleaned = p.script.replace_all(html, "");
    let cleaned = p.style.replace_all(&cleaned, "");

    let text = p.tags.replace_all(&cleaned, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let text = p.blank_lines.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_styles_and_tags() {
        let html = "<html><head><style>a{}</style><script>x()</script></head>\
                    <body><h1>acme/rocket</h1><p>Stars&nbsp;1.2k &amp; forks</p></body></html>";
        let text = strip_html_tags(html);
        assert!(text.contains("acme/rocket"));
        assert!(text.contains("Stars 1.2k & forks"));
        assert!(!text.contains("x()"));
        assert!(!text.contains("a{}"));
    }

    #[test]
    fn collapses_blank_runs() {
        let text = strip_html_tags("a\n\n\n\n\nb");
        assert_eq!(text, "a\n\nb");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let out = truncate("héllo wörld".to_string(), 2);
        assert!(out.starts_with('h'));
        assert!(out.contains("[truncated at 2 chars]"));
    }

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate("abc".into(), 10), "abc");
    }
}
