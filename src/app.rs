use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, HandlerKind};
use crate::db::SnapshotStore;
use crate::error::{AppError, Result};
use crate::feed::{parse_opml_file, FeedFetcher, FetchFeed};
use crate::handler::{Courier, DummyHandler, FileOutbox, ItemHandler};
use crate::services::{PageRenderer, Templates};
use crate::sync::{DispatchSettings, Dispatcher, RunReport};

/// One batch run: subscriptions in, deliveries out, snapshot persisted.
pub struct App {
    config: Config,
    fetcher: Arc<dyn FetchFeed>,
    handler: Arc<dyn ItemHandler>,
    store: Arc<SnapshotStore>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = FeedFetcher::new(
            Duration::from_millis(config.feed_connect_timeout_ms),
            Duration::from_millis(config.feed_read_timeout_ms),
        )?;
        let handler = build_handler(&config)?;
        Ok(Self::with_collaborators(config, Arc::new(fetcher), handler))
    }

    pub fn with_collaborators(
        config: Config,
        fetcher: Arc<dyn FetchFeed>,
        handler: Arc<dyn ItemHandler>,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new(&config.snapshot_path));
        Self {
            config,
            fetcher,
            handler,
            store,
        }
    }

    pub async fn run(&self) -> Result<RunReport> {
        let templates = Templates::load(
            self.config.text_template.as_deref().map(Path::new),
            self.config.html_template.as_deref().map(Path::new),
        )?;

        let subscriptions_path = Path::new(&self.config.subscriptions_path);
        let subscriptions = parse_opml_file(subscriptions_path).map_err(|e| match e {
            AppError::Io(e) => AppError::Config(format!(
                "cannot read subscriptions {}: {}",
                subscriptions_path.display(),
                e
            )),
            other => other,
        })?;

        let mut catalog = self.store.load().await?;
        let changes = catalog.reconcile(&subscriptions);
        tracing::info!(
            added = changes.added,
            kept = changes.kept,
            removed = changes.removed,
            "Loaded {} subscriptions",
            catalog.len()
        );
        if catalog.is_empty() {
            tracing::warn!("{} lists no feeds", subscriptions_path.display());
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.handler),
            Arc::new(templates),
            Arc::clone(&self.store),
            DispatchSettings::from_config(&self.config),
        );

        let (catalog, report) = dispatcher.run(catalog).await?;
        self.store.save(&catalog).await?;

        Ok(report)
    }
}

fn build_handler(config: &Config) -> Result<Arc<dyn ItemHandler>> {
    let handler: Arc<dyn ItemHandler> = match config.handler {
        HandlerKind::Dummy => Arc::new(DummyHandler),
        HandlerKind::File => {
            let mut courier = Courier::new(FileOutbox::new(&config.output_dir));
            if config.enable_enrichment {
                let renderer = PageRenderer::new(Duration::from_secs(config.page_timeout_secs))?;
                courier = courier.with_enrichment(Arc::new(renderer));
            }
            Arc::new(courier)
        }
    };
    Ok(handler)
}
