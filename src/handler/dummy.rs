use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{DeliveryState, Item, SourceView};

use super::ItemHandler;

/// Marks every item fully delivered without sending anything.
///
/// Useful for seeding the snapshot of a fresh subscription list so the first
/// real run does not deliver the whole backlog.
#[derive(Debug, Default)]
pub struct DummyHandler;

#[async_trait]
impl ItemHandler for DummyHandler {
    async fn deliver(&self, source: &SourceView, item: &Item) -> Result<DeliveryState> {
        tracing::info!(source = %source.title, "New item: {}", item);
        Ok(DeliveryState::SentPdf)
    }

    async fn report_error(&self, source: &SourceView, error: &AppError) {
        tracing::error!(source = %source.url, error = %error, "Error while processing feed");
    }
}
