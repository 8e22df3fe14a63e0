use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::feed::SubscriptionNode;
use crate::models::Source;

/// The full set of known sources, in subscription order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    sources: Vec<Source>,
}

/// What a catalog reconciliation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogChanges {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
}

impl Catalog {
    #[cfg(test)]
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    #[cfg(test)]
    pub fn sources_mut(&mut self) -> &mut [Source] {
        &mut self.sources
    }

    pub fn source(&self, url: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.url() == url)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.sources.iter().map(|s| s.items().len()).sum()
    }

    /// Replaces the stored copy of the source with the same URL.
    pub fn publish(&mut self, source: Source) -> bool {
        match self.sources.iter_mut().find(|s| s.url() == source.url()) {
            Some(slot) => {
                *slot = source;
                true
            }
            None => false,
        }
    }

    /// Merges a freshly loaded subscription tree into this catalog.
    ///
    /// The new tree decides which sources exist, their order and their title
    /// paths. Sources that survive keep their item cache untouched.
    pub fn reconcile(&mut self, subscriptions: &[SubscriptionNode]) -> CatalogChanges {
        let mut previous: HashMap<String, Source> = std::mem::take(&mut self.sources)
            .into_iter()
            .map(|s| (s.url().to_string(), s))
            .collect();
        let mut changes = CatalogChanges::default();

        for mut source in flatten(subscriptions) {
            match previous.remove(source.url()) {
                Some(old) => {
                    source.adopt_items(old);
                    changes.kept += 1;
                }
                None => {
                    tracing::info!(source = %source.url(), "New subscription: {}", source.user_title());
                    changes.added += 1;
                }
            }
            self.sources.push(source);
        }

        for url in previous.keys() {
            tracing::info!(source = %url, "Subscription removed, dropping cached items");
        }
        changes.removed = previous.len();
        changes
    }
}

/// Flattens a subscription tree into sources, each carrying the titles of
/// its ancestors followed by its own. The first occurrence of a URL wins.
pub fn flatten(subscriptions: &[SubscriptionNode]) -> Vec<Source> {
    fn walk(
        nodes: &[SubscriptionNode],
        parents: &[String],
        seen: &mut HashSet<String>,
        out: &mut Vec<Source>,
    ) {
        for node in nodes {
            let mut path = parents.to_vec();
            path.push(node.title.clone());

            if let Some(url) = node.feed_url() {
                if seen.insert(url.to_string()) {
                    out.push(Source::new(url, path.clone()));
                } else {
                    tracing::debug!(source = %url, "Duplicate subscription ignored");
                }
            }
            walk(&node.children, &path, seen, out);
        }
    }

    let mut out = Vec::new();
    walk(subscriptions, &[], &mut HashSet::new(), &mut out);
    out
}
