pub mod page_renderer;
pub mod templates;

use async_trait::async_trait;

use crate::error::Result;

pub use page_renderer::PageRenderer;
pub use templates::{TemplateContext, Templates};

/// Produces an enriched rendering of a linked page.
#[async_trait]
pub trait RenderPage: Send + Sync {
    async fn render(&self, url: &str) -> Result<Vec<u8>>;
}
