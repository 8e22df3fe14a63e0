use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::AppError;
use crate::handler::ItemHandler;
use crate::models::{Entry, Item, Source};
use crate::services::Templates;

/// Result of diffing a fetch against a source's cache, before delivery.
#[derive(Debug, Default)]
pub struct Merge {
    /// New or retried items, already inserted into the cache.
    pub pending: Vec<Item>,
    pub expired: usize,
    pub refreshed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceOutcome {
    pub delivered: usize,
    pub failed: usize,
    pub expired: usize,
}

/// Diffs freshly fetched entries against the cached items of `source`.
///
/// Items absent from the fetch are dropped once their last sighting is
/// older than `cutoff`. Items present in both carry their delivery state
/// over to the fresh copy; fully delivered ones are only refreshed, any
/// other state is handed out again for delivery.
pub fn merge_entries(
    source: &mut Source,
    entries: &[Entry],
    templates: &Templates,
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> Merge {
    let view = source.view();
    let mut unique = HashSet::new();
    let mut candidates: Vec<Item> = entries
        .iter()
        .map(|entry| Item::from_entry(&view, entry, templates, now))
        .filter(|item| unique.insert(item.id().to_string()))
        .collect();
    let index: HashMap<String, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id().to_string(), i))
        .collect();

    let mut merge = Merge::default();
    let cache = source.items_mut();

    cache.retain(|id, cached| match index.get(id) {
        None => {
            if cached.is_expired(cutoff) {
                tracing::debug!(
                    source = %view.url,
                    item = %cached,
                    last_seen = %cached.last_seen(),
                    "Dropping expired item"
                );
                merge.expired += 1;
                false
            } else {
                true
            }
        }
        Some(&i) => {
            candidates[i].set_state(cached.state());
            if cached.state().is_terminal() {
                cached.touch(now);
                merge.refreshed += 1;
                true
            } else {
                false
            }
        }
    });

    candidates.retain(|item| !source.items().contains_key(item.id()));
    for item in &candidates {
        source.insert_item(item.clone());
    }

    merge.pending = candidates;
    merge
}

/// Hands every pending item to `handler` concurrently, at most as many at
/// once as `permits` allows, and records the outcome in the cache.
///
/// An item whose delivery fails or panics is evicted so it is picked up
/// again on the next run; its siblings are unaffected.
pub async fn deliver_pending(
    source: &mut Source,
    pending: Vec<Item>,
    handler: Arc<dyn ItemHandler>,
    permits: Arc<Semaphore>,
) -> (usize, usize) {
    let view = Arc::new(source.view());

    let tasks: Vec<_> = pending
        .into_iter()
        .map(|item| {
            let id = item.id().to_string();
            let handler = Arc::clone(&handler);
            let view = Arc::clone(&view);
            let permits = Arc::clone(&permits);
            let task = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::Delivery("item pool closed".to_string()))?;
                handler.deliver(&view, &item).await
            });
            (id, task)
        })
        .collect();

    let (ids, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
    let results = join_all(handles).await;

    let mut delivered = 0;
    let mut failed = 0;
    for (id, joined) in ids.into_iter().zip(results) {
        let outcome = joined
            .unwrap_or_else(|e| Err(AppError::Delivery(format!("delivery task aborted: {}", e))));

        match outcome {
            Ok(state) => {
                if let Some(item) = source.items_mut().get_mut(&id) {
                    item.set_state(state);
                }
                delivered += 1;
            }
            Err(e) => {
                tracing::warn!(source = %view.url, item = %id, error = %e, "Delivery failed, will retry next run");
                source.items_mut().remove(&id);
                failed += 1;
                handler.report_error(&view, &e).await;
            }
        }
    }

    (delivered, failed)
}

/// Reconciles one source against its fetched entries and delivers the
/// resulting new and retried items.
pub async fn reconcile_source(
    source: &mut Source,
    entries: &[Entry],
    templates: &Templates,
    handler: Arc<dyn ItemHandler>,
    permits: Arc<Semaphore>,
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> SourceOutcome {
    let merge = merge_entries(source, entries, templates, now, cutoff);
    tracing::debug!(
        source = %source.url(),
        pending = merge.pending.len(),
        refreshed = merge.refreshed,
        expired = merge.expired,
        "Reconciled cache"
    );

    let (delivered, failed) = deliver_pending(source, merge.pending, handler, permits).await;

    SourceOutcome {
        delivered,
        failed,
        expired: merge.expired,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::item::tests::entry;
    use crate::models::{DeliveryState, SourceView};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every delivery; fails items whose title is listed.
    #[derive(Default)]
    pub(crate) struct ScriptedHandler {
        pub delivered: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
        pub fail_titles: Vec<String>,
        pub panic_titles: Vec<String>,
        pub result: Option<DeliveryState>,
        pub delay: std::time::Duration,
        pub active: AtomicUsize,
        pub peak: AtomicUsize,
    }

    impl ScriptedHandler {
        pub(crate) fn delivered_titles(&self) -> Vec<String> {
            let mut titles = self.delivered.lock().unwrap().clone();
            titles.sort();
            titles
        }
    }

    #[async_trait]
    impl ItemHandler for ScriptedHandler {
        async fn deliver(&self, _source: &SourceView, item: &Item) -> Result<DeliveryState> {
            let title = item.title().unwrap_or_default().to_string();

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic_titles.contains(&title) {
                panic!("handler blew up on {}", title);
            }
            if self.fail_titles.contains(&title) {
                return Err(AppError::Delivery(format!("cannot deliver {}", title)));
            }
            self.delivered.lock().unwrap().push(title);
            Ok(self.result.unwrap_or(DeliveryState::SentPdf))
        }

        async fn report_error(&self, _source: &SourceView, error: &AppError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    fn source() -> Source {
        Source::new("https://example.com/feed", vec!["Example".to_string()])
    }

    fn e(name: &str) -> Entry {
        entry(
            &format!("urn:{}", name),
            &format!("https://example.com/{}", name),
            name,
        )
    }

    fn cached(source: &mut Source, name: &str, state: DeliveryState, seen: DateTime<Utc>) {
        let mut item = Item::from_entry(&source.view(), &e(name), &Templates::default(), seen);
        item.set_state(state);
        source.insert_item(item);
    }

    fn state_of(source: &Source, name: &str) -> Option<DeliveryState> {
        let id = crate::models::item::item_id(source.url(), &e(name));
        source.item(&id).map(|i| i.state())
    }

    async fn run(
        source: &mut Source,
        entries: &[Entry],
        handler: &Arc<ScriptedHandler>,
        now: DateTime<Utc>,
    ) -> SourceOutcome {
        reconcile_source(
            source,
            entries,
            &Templates::default(),
            Arc::clone(handler) as Arc<dyn ItemHandler>,
            Arc::new(Semaphore::new(2)),
            now,
            now - Duration::days(5),
        )
        .await
    }

    #[tokio::test]
    async fn test_expired_absent_item_dropped_and_terminal_item_not_redelivered() {
        let now = Utc::now();
        let mut s = source();
        cached(&mut s, "A", DeliveryState::SentPdf, now - Duration::days(1));
        cached(&mut s, "B", DeliveryState::New, now - Duration::days(10));
        let handler = Arc::new(ScriptedHandler::default());

        let outcome = run(&mut s, &[e("A")], &handler, now).await;

        assert_eq!(outcome, SourceOutcome { delivered: 0, failed: 0, expired: 1 });
        assert!(handler.delivered_titles().is_empty());
        assert_eq!(s.items().len(), 1);
        assert_eq!(state_of(&s, "A"), Some(DeliveryState::SentPdf));
        let a = s.items().values().next().unwrap();
        assert_eq!(a.last_seen(), now);
    }

    #[tokio::test]
    async fn test_recent_absent_item_is_retained() {
        let now = Utc::now();
        let mut s = source();
        let seen = now - Duration::days(2);
        cached(&mut s, "C", DeliveryState::SentEntry, seen);
        let handler = Arc::new(ScriptedHandler::default());

        let outcome = run(&mut s, &[], &handler, now).await;

        assert_eq!(outcome.expired, 0);
        assert_eq!(state_of(&s, "C"), Some(DeliveryState::SentEntry));
        assert_eq!(s.items().values().next().unwrap().last_seen(), seen);
    }

    #[tokio::test]
    async fn test_new_entries_are_delivered_and_cached() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler::default());

        let outcome = run(&mut s, &[e("A"), e("B"), e("C")], &handler, now).await;

        assert_eq!(outcome.delivered, 3);
        assert_eq!(handler.delivered_titles(), vec!["A", "B", "C"]);
        assert_eq!(state_of(&s, "B"), Some(DeliveryState::SentPdf));
    }

    #[tokio::test]
    async fn test_duplicate_entries_are_delivered_once() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler::default());

        run(&mut s, &[e("A"), e("A")], &handler, now).await;

        assert_eq!(handler.delivered_titles(), vec!["A"]);
        assert_eq!(s.items().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler::default());
        let entries = [e("A"), e("B")];

        run(&mut s, &entries, &handler, now).await;
        let first: Vec<_> = ["A", "B"].iter().map(|n| state_of(&s, n)).collect();

        let outcome = run(&mut s, &entries, &handler, now + Duration::hours(1)).await;
        let second: Vec<_> = ["A", "B"].iter().map(|n| state_of(&s, n)).collect();

        assert_eq!(first, second);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(handler.delivered_titles(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_sent_pdf_is_never_redelivered() {
        let now = Utc::now();
        let mut s = source();
        cached(&mut s, "A", DeliveryState::SentPdf, now - Duration::days(1));
        let handler = Arc::new(ScriptedHandler::default());

        for hour in 0..3 {
            run(&mut s, &[e("A")], &handler, now + Duration::hours(hour)).await;
        }

        assert!(handler.delivered_titles().is_empty());
        assert_eq!(state_of(&s, "A"), Some(DeliveryState::SentPdf));
    }

    #[tokio::test]
    async fn test_non_terminal_item_is_retried_with_its_state() {
        let now = Utc::now();
        let mut s = source();
        cached(&mut s, "A", DeliveryState::SentEntry, now - Duration::days(1));

        let merge = merge_entries(
            &mut s,
            &[e("A")],
            &Templates::default(),
            now,
            now - Duration::days(5),
        );

        assert_eq!(merge.pending.len(), 1);
        assert_eq!(merge.pending[0].state(), DeliveryState::SentEntry);
        assert!(merge.pending[0].rendered().is_some());
        assert_eq!(merge.pending[0].last_seen(), now);
    }

    #[tokio::test]
    async fn test_failed_item_is_evicted_and_siblings_unaffected() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler {
            fail_titles: vec!["B".to_string()],
            ..Default::default()
        });

        let outcome = run(&mut s, &[e("A"), e("B"), e("C")], &handler, now).await;

        assert_eq!(outcome, SourceOutcome { delivered: 2, failed: 1, expired: 0 });
        assert_eq!(state_of(&s, "A"), Some(DeliveryState::SentPdf));
        assert_eq!(state_of(&s, "B"), None);
        assert_eq!(state_of(&s, "C"), Some(DeliveryState::SentPdf));
        assert_eq!(handler.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_is_evicted_and_retried_later() {
        let now = Utc::now();
        let mut s = source();
        cached(&mut s, "B", DeliveryState::SentEntry, now - Duration::days(1));
        let failing = Arc::new(ScriptedHandler {
            fail_titles: vec!["B".to_string()],
            ..Default::default()
        });

        run(&mut s, &[e("B")], &failing, now).await;
        assert_eq!(state_of(&s, "B"), None);

        let working = Arc::new(ScriptedHandler::default());
        run(&mut s, &[e("B")], &working, now + Duration::hours(1)).await;
        assert_eq!(working.delivered_titles(), vec!["B"]);
        assert_eq!(state_of(&s, "B"), Some(DeliveryState::SentPdf));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler {
            panic_titles: vec!["A".to_string()],
            ..Default::default()
        });

        let outcome = run(&mut s, &[e("A"), e("B")], &handler, now).await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(state_of(&s, "A"), None);
        assert_eq!(state_of(&s, "B"), Some(DeliveryState::SentPdf));
    }

    #[tokio::test]
    async fn test_sent_entry_keeps_being_retried() {
        let now = Utc::now();
        let mut s = source();
        let handler = Arc::new(ScriptedHandler {
            result: Some(DeliveryState::SentEntry),
            ..Default::default()
        });

        run(&mut s, &[e("A")], &handler, now).await;
        run(&mut s, &[e("A")], &handler, now + Duration::hours(1)).await;

        assert_eq!(handler.delivered_titles(), vec!["A", "A"]);
        assert_eq!(state_of(&s, "A"), Some(DeliveryState::SentEntry));
    }
}
