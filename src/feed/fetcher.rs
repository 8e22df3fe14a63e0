use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::Result;
use crate::models::Entry;

use super::{FetchFeed, FetchedFeed};

const USER_AGENT_STRING: &str = "feed-courier/1.0";

static XML_ENCODING: OnceLock<Regex> = OnceLock::new();

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(connect_timeout + read_timeout)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(USER_AGENT_STRING)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchFeed for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        // A charset in the header wins over the XML declaration.
        let feed = if encoding.is_some() {
            let body = response.text().await?;
            parser::parse(declare_utf8(&body).as_bytes())?
        } else {
            let bytes = response.bytes().await?;
            parser::parse(&bytes[..])?
        };

        Ok(FetchedFeed {
            title: feed.title.map(|t| t.content),
            encoding,
            entries: feed.entries.into_iter().map(entry_from_feed_rs).collect(),
        })
    }
}

fn entry_from_feed_rs(entry: feed_rs::model::Entry) -> Entry {
    // Try content first, then fall back to summary
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content));

    Entry {
        uri: Some(entry.id).filter(|id| !id.is_empty()),
        link: entry.links.first().map(|l| l.href.clone()),
        title: entry.title.map(|t| t.content),
        author: entry.authors.first().map(|a| a.name.clone()),
        published: entry.published.or(entry.updated),
        content,
    }
}

/// Extracts the `charset` parameter of a Content-Type header value.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Rewrites the `encoding` of an XML declaration to utf-8 for a document
/// that has already been decoded.
fn declare_utf8(document: &str) -> Cow<'_, str> {
    let re = XML_ENCODING.get_or_init(|| {
        Regex::new(r#"\A(\s*<\?xml[^>]*?encoding\s*=\s*)(["'])[^"']*["']"#)
            .expect("valid xml declaration pattern")
    });
    re.replace(document, "${1}${2}utf-8${2}")
}
