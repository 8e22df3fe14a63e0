use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};

use super::RenderPage;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const MAX_REDIRECTS: usize = 10;
const TEXT_WIDTH: usize = 80;
const MIN_DOCUMENT_CHARS: usize = 200;

/// Downloads the page an entry links to and reduces it to a readable document.
pub struct PageRenderer {
    client: Client,
}

impl PageRenderer {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RenderPage for PageRenderer {
    async fn render(&self, page_url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(page_url)
            .map_err(|e| AppError::Enrichment(format!("invalid link {}: {}", page_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Enrichment(format!(
                "unsupported link scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let response = self.client.get(url).headers(headers).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Enrichment(format!(
                "failed to fetch {}: HTTP {}",
                page_url,
                response.status()
            )));
        }

        let html = response.text().await?;
        let document = extract_document(&html)
            .ok_or_else(|| AppError::Enrichment(format!("no readable content at {}", page_url)))?;

        Ok(document.into_bytes())
    }
}

/// Converts HTML into trimmed plain text; `None` when too little text remains.
fn extract_document(html: &str) -> Option<String> {
    let text = match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let cleaned: String = text
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.chars().count() > MIN_DOCUMENT_CHARS {
        Some(cleaned)
    } else {
        tracing::debug!("Extracted content too short ({} chars)", cleaned.len());
        None
    }
}
