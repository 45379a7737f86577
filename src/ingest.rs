//! Text extraction for uploaded documents and web pages.
//!
//! Callers supply PDF bytes or a URL; this module returns plain UTF-8 text.
//! Summarization and storage happen in the server handlers.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("invalid URL '{0}': only http and https are supported")]
    InvalidUrl(String),

    #[error("failed to fetch URL: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("no text could be extracted")]
    Empty,
}

/// Extracts the text of every page of a PDF.
///
/// CPU-bound; async callers should use [`extract_pdf_blocking`].
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String, IngestError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| IngestError::Pdf(e.to_string()))?;
    non_empty(text.trim().to_string())
}

/// Runs [`extract_text_from_pdf`] on the blocking thread pool.
pub async fn extract_pdf_blocking(bytes: Vec<u8>) -> Result<String, IngestError> {
    tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes))
        .await
        .map_err(|e| IngestError::Pdf(format!("extractor aborted: {}", e)))?
}

/// Fetches a page and reduces it to readable text.
pub async fn extract_text_from_url(
    client: &reqwest::Client,
    url: &str,
) -> Result<String, IngestError> {
    let parsed = Url::parse(url).map_err(|_| IngestError::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IngestError::InvalidUrl(url.to_string()));
    }

    let response = client.get(parsed).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    tracing::debug!(url, bytes = body.len(), "fetched page");
    non_empty(html_to_text(&body))
}

fn non_empty(text: String) -> Result<String, IngestError> {
    if text.trim().is_empty() {
        Err(IngestError::Empty)
    } else {
        Ok(text)
    }
}

fn hidden_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
            .expect("valid regex")
    })
}

fn line_breaks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|title|section|article)\s*>")
            .expect("valid regex")
    })
}

fn tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

fn numeric_entities() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"))
}

/// Reduces an HTML document to text.
///
/// Scripts, styles, and comments are dropped along with every tag. Each
/// line is trimmed and split on double spaces; blank pieces are removed and
/// the rest joined with newlines.
pub fn html_to_text(html: &str) -> String {
    let text = hidden_blocks().replace_all(html, " ");
    let text = line_breaks().replace_all(&text, "\n");
    let text = tags().replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .flat_map(|line| line.trim().split("  "))
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    let text = numeric_entities().replace_all(text, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    // &amp; last so "&amp;lt;" stays "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_drops_scripts_and_styles() {
        let html = r#"<html><head><title>Ownership</title>
            <style>body { color: red; }</style>
            <script type="text/javascript">var x = "<p>";</script></head>
            <body><h1>Moves</h1><p>Values have   one owner.</p><!-- hidden --></body></html>"#;
        assert_eq!(html_to_text(html), "Ownership\nMoves\nValues have\none owner.");
    }

    #[test]
    fn test_html_decodes_entities() {
        assert_eq!(
            html_to_text("<p>a &lt; b &amp;&amp; c&#39;s &#x263A;</p>"),
            "a < b && c's \u{263A}"
        );
        assert_eq!(html_to_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_html_blank_document_is_empty() {
        assert_eq!(html_to_text("<div>  </div>\n<br/>"), "");
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract_text_from_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, IngestError::Pdf(_)));
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let client = reqwest::Client::new();
        for url in ["ftp://example.com/file", "not a url", "file:///etc/passwd"] {
            let err = extract_text_from_url(&client, url).await.unwrap_err();
            assert!(matches!(err, IngestError::InvalidUrl(_)), "{url}");
        }
    }
}
