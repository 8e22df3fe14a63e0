//! Delivery of new and changed items.
//!
//! [`ItemHandler`] is what the dispatcher talks to. [`Courier`] implements it
//! on top of an [`Outbox`] and owns the delivery state machine; [`DummyHandler`]
//! marks items delivered without sending anything.

mod courier;
mod dummy;
mod file_outbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{DeliveryState, Item, SourceView};

pub use courier::Courier;
pub use dummy::DummyHandler;
pub use file_outbox::FileOutbox;

#[async_trait]
pub trait ItemHandler: Send + Sync {
    /// Delivers one item and returns the state it reached.
    ///
    /// An error means nothing usable went out; the item is evicted from the
    /// cache so that it is retried on the next run.
    async fn deliver(&self, source: &SourceView, item: &Item) -> Result<DeliveryState>;

    /// Best-effort error channel. Must not fail.
    async fn report_error(&self, source: &SourceView, error: &AppError);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A message ready to be handed to an [`Outbox`].
#[derive(Debug, Clone)]
pub struct Notification {
    pub sender: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub attachment: Option<Attachment>,
}

/// Final transport for notifications and error reports.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, source: &SourceView, notification: &Notification) -> Result<()>;

    async fn send_error(&self, source: &SourceView, message: &str) -> Result<()>;
}

/// Collapses line breaks so a value fits into a single header line.
pub(crate) fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("")
}
