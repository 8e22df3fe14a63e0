use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{DeliveryState, Item, SourceView};
use crate::services::RenderPage;

use super::{single_line, Attachment, ItemHandler, Notification, Outbox};

const ATTACHMENT_NAME: &str = "source.txt";
const ATTACHMENT_TYPE: &str = "text/plain; charset=utf-8";

/// Sends item notifications through an [`Outbox`], attaching an enriched
/// rendering of the linked page when one can be produced.
pub struct Courier<O> {
    outbox: O,
    renderer: Option<Arc<dyn RenderPage>>,
}

impl<O: Outbox> Courier<O> {
    pub fn new(outbox: O) -> Self {
        Self {
            outbox,
            renderer: None,
        }
    }

    pub fn with_enrichment(mut self, renderer: Arc<dyn RenderPage>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    async fn enrich(&self, item: &Item) -> Option<Attachment> {
        let renderer = self.renderer.as_ref()?;
        let link = item.link()?;

        match renderer.render(link).await {
            Ok(data) => Some(Attachment {
                file_name: ATTACHMENT_NAME.to_string(),
                content_type: ATTACHMENT_TYPE.to_string(),
                data,
            }),
            Err(e) => {
                tracing::warn!(item = %item, error = %e, "Cannot render linked page");
                None
            }
        }
    }
}

#[async_trait]
impl<O: Outbox> ItemHandler for Courier<O> {
    async fn deliver(&self, source: &SourceView, item: &Item) -> Result<DeliveryState> {
        let rendered = item.rendered().ok_or_else(|| {
            AppError::Delivery(format!("item {} has no rendered notification", item))
        })?;

        let previous = item.state();
        let mut new_state = previous;

        let attachment = if previous.is_terminal() {
            None
        } else {
            self.enrich(item).await
        };
        if attachment.is_some() {
            new_state = DeliveryState::SentPdf;
        }

        // The plain notification already went out on an earlier run.
        let failed_again =
            previous == DeliveryState::SentEntry && new_state == DeliveryState::SentEntry;

        if failed_again {
            tracing::debug!(item = %item, "Enrichment failed again, not resending entry");
        } else {
            let notification = Notification {
                sender: single_line(&source.title),
                subject: single_line(item.title().unwrap_or("Untitled")),
                text: rendered.text.clone(),
                html: rendered.html.clone(),
                sent_at: item.published(),
                attachment,
            };
            self.outbox.send(source, &notification).await?;
        }

        if new_state != DeliveryState::SentPdf {
            new_state = DeliveryState::SentEntry;
        }
        Ok(new_state)
    }

    async fn report_error(&self, source: &SourceView, error: &AppError) {
        tracing::error!(source = %source.url, error = %error, "Error while processing feed");
        let message = format!("{}\n\n{}", source.url, error);
        if let Err(e) = self.outbox.send_error(source, &message).await {
            tracing::error!(source = %source.url, error = %e, "Failed to report error");
        }
    }
}
