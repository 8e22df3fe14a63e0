use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::Config;
use crate::db::SnapshotStore;
use crate::error::{AppError, Result};
use crate::feed::FetchFeed;
use crate::handler::ItemHandler;
use crate::models::Source;
use crate::services::Templates;

use super::reconcile::{reconcile_source, SourceOutcome};
use super::Catalog;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub source_pool: usize,
    pub item_pool: usize,
    pub cache_expiry: chrono::Duration,
    /// `None` runs without a deadline.
    pub deadline: Option<Duration>,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_pool: config.worker_pool_size.max(1),
            item_pool: config.item_pool_size().max(1),
            cache_expiry: config.cache_expiry(),
            deadline: config.max_run_duration(),
        }
    }
}

/// Totals for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources: usize,
    pub failed_sources: usize,
    pub delivered: usize,
    pub failed_items: usize,
    pub expired: usize,
}

impl RunReport {
    fn record(&mut self, outcome: SourceOutcome) {
        self.delivered += outcome.delivered;
        self.failed_items += outcome.failed;
        self.expired += outcome.expired;
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources ({} failed), {} items delivered ({} failed), {} expired",
            self.sources, self.failed_sources, self.delivered, self.failed_items, self.expired
        )
    }
}

/// State shared by every per-source unit of work in one run.
struct RunContext {
    fetcher: Arc<dyn FetchFeed>,
    handler: Arc<dyn ItemHandler>,
    templates: Arc<Templates>,
    source_permits: Semaphore,
    item_permits: Arc<Semaphore>,
    published: Arc<Mutex<Catalog>>,
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
}

type UnitResult = (String, Result<SourceOutcome>);

/// Runs fetch, reconciliation and delivery for every source concurrently
/// and enforces the run deadline.
pub struct Dispatcher {
    fetcher: Arc<dyn FetchFeed>,
    handler: Arc<dyn ItemHandler>,
    templates: Arc<Templates>,
    store: Arc<SnapshotStore>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        fetcher: Arc<dyn FetchFeed>,
        handler: Arc<dyn ItemHandler>,
        templates: Arc<Templates>,
        store: Arc<SnapshotStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            fetcher,
            handler,
            templates,
            store,
            settings,
        }
    }

    /// Processes every source of `catalog` and returns the updated catalog.
    ///
    /// When the deadline passes first, whatever the finished sources have
    /// published is saved to the snapshot store and
    /// [`AppError::DeadlineExceeded`] is returned. Work still in flight is
    /// left running.
    pub async fn run(&self, catalog: Catalog) -> Result<(Catalog, RunReport)> {
        let started = Instant::now();
        let now = Utc::now();
        let sources: Vec<Source> = catalog.sources().to_vec();
        let published = Arc::new(Mutex::new(catalog));

        let ctx = Arc::new(RunContext {
            fetcher: Arc::clone(&self.fetcher),
            handler: Arc::clone(&self.handler),
            templates: Arc::clone(&self.templates),
            source_permits: Semaphore::new(self.settings.source_pool),
            item_permits: Arc::new(Semaphore::new(self.settings.item_pool)),
            published: Arc::clone(&published),
            now,
            cutoff: now
                .checked_sub_signed(self.settings.cache_expiry)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        });

        let mut report = RunReport {
            sources: sources.len(),
            ..Default::default()
        };

        tracing::info!(
            sources = sources.len(),
            workers = self.settings.source_pool,
            "Dispatching sources"
        );

        let mut units: JoinSet<UnitResult> = JoinSet::new();
        for source in sources {
            units.spawn(run_unit(Arc::clone(&ctx), source));
        }

        let finished = match self.settings.deadline {
            None => {
                drain(&mut units, &mut report).await;
                true
            }
            Some(limit) => tokio::select! {
                _ = drain(&mut units, &mut report) => true,
                _ = tokio::time::sleep_until(started + limit) => false,
            },
        };

        if !finished {
            let limit = self.settings.deadline.unwrap_or_default();
            tracing::error!(
                pending = units.len(),
                "Run exceeded {}s, saving emergency snapshot",
                limit.as_secs()
            );
            units.detach_all();
            self.emergency_save(&published).await;
            return Err(AppError::DeadlineExceeded { limit });
        }

        let catalog = std::mem::take(&mut *published.lock().await);
        tracing::info!("Dispatch finished: {}", report);
        Ok((catalog, report))
    }

    async fn emergency_save(&self, published: &Mutex<Catalog>) {
        let snapshot = published.lock().await.clone();
        match self.store.save(&snapshot).await {
            Ok(()) => tracing::info!("Emergency snapshot saved to {}", self.store.path().display()),
            Err(e) => tracing::error!(error = %e, "Failed to save emergency snapshot"),
        }
    }
}

async fn drain(units: &mut JoinSet<UnitResult>, report: &mut RunReport) {
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => report.record(outcome),
            Ok((_, Err(_))) => report.failed_sources += 1,
            Err(e) => {
                tracing::error!("Source task aborted: {}", e);
                report.failed_sources += 1;
            }
        }
    }
}

/// One source's unit of work. Failures are reported here and never reach
/// sibling units.
async fn run_unit(ctx: Arc<RunContext>, source: Source) -> UnitResult {
    let url = source.url().to_string();
    let view = source.view();

    let result = process_source(&ctx, source).await;
    if let Err(e) = &result {
        tracing::warn!(source = %url, error = %e, "Source failed, keeping previous state");
        ctx.handler.report_error(&view, e).await;
    }
    (url, result)
}

async fn process_source(ctx: &RunContext, mut source: Source) -> Result<SourceOutcome> {
    let _permit = ctx
        .source_permits
        .acquire()
        .await
        .map_err(|_| anyhow::anyhow!("source pool closed"))?;

    let feed = ctx.fetcher.fetch(source.url()).await?;
    source.set_document_info(feed.title, feed.encoding);
    tracing::debug!(
        source = %source.url(),
        entries = feed.entries.len(),
        encoding = source.encoding(),
        "Fetched feed"
    );

    let outcome = reconcile_source(
        &mut source,
        &feed.entries,
        &ctx.templates,
        Arc::clone(&ctx.handler),
        Arc::clone(&ctx.item_permits),
        ctx.now,
        ctx.cutoff,
    )
    .await;

    if outcome.delivered + outcome.failed > 0 {
        tracing::info!(
            source = %source.url(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Processed {}",
            source.title()
        );
    }

    ctx.published.lock().await.publish(source);
    Ok(outcome)
}
