mod fetcher;
mod subscriptions;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Entry;

pub use fetcher::FeedFetcher;
pub use subscriptions::{parse_opml_file, SubscriptionNode};

/// A fetched and parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub encoding: Option<String>,
    pub entries: Vec<Entry>,
}

#[async_trait]
pub trait FetchFeed: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}
