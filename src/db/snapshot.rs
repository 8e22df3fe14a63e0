use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::sync::Catalog;

/// Durable copy of the whole catalog, replaced atomically on every save.
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Restores the last committed snapshot. A missing file is an empty catalog.
    pub async fn load(&self) -> Result<Catalog> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let catalog: Catalog = serde_json::from_slice(&bytes)?;
                tracing::debug!(
                    sources = catalog.len(),
                    items = catalog.item_count(),
                    "Restored snapshot from {}",
                    self.path.display()
                );
                Ok(catalog)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No snapshot at {}, starting empty", self.path.display());
                Ok(Catalog::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the catalog to a temporary file and renames it over the
    /// snapshot. Concurrent saves are serialized.
    pub async fn save(&self, catalog: &Catalog) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(catalog)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await?;
        tracing::debug!(
            sources = catalog.len(),
            items = catalog.item_count(),
            "Saved snapshot to {}",
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::tests::entry;
    use crate::models::{DeliveryState, Item, Source};
    use crate::services::Templates;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn catalog() -> Catalog {
        let mut source = Source::new(
            "https://example.com/feed",
            vec!["Tech".to_string(), "Example".to_string()],
        );
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut item = Item::from_entry(
            &source.view(),
            &entry("urn:1", "https://example.com/1", "One"),
            &Templates::default(),
            seen,
        );
        item.set_state(DeliveryState::SentEntry);
        source.insert_item(item);
        Catalog::new(vec![source, Source::new("https://empty.example/feed", vec![])])
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("feeds.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("nested/feeds.json"));
        let original = catalog();

        store.save(&original).await.unwrap();
        let restored = store.load().await.unwrap();

        assert_eq!(restored.len(), 2);
        let source = restored.source("https://example.com/feed").unwrap();
        assert_eq!(source.user_title(), "Tech / Example");
        let before = original.sources()[0].items().values().next().unwrap();
        let after = source.item(before.id()).unwrap();
        assert_eq!(after.state(), DeliveryState::SentEntry);
        assert_eq!(after.last_seen(), before.last_seen());
        assert_eq!(after.title(), Some("One"));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_interrupted_save_keeps_previous_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("feeds.json"));
        tokio_test::assert_ok!(store.save(&catalog()).await);

        // temp file written, rename never happened
        std::fs::write(store.temp_path(), b"{\"sources\": [ {\"url\": ").unwrap();

        let restored = store.load().await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.item_count(), 1);

        // the next save replaces the stale temp file
        store.save(&Catalog::default()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("feeds.json"));
        std::fs::write(store.path(), b"not json").unwrap();
        tokio_test::assert_err!(store.load().await);
    }

    #[tokio::test]
    async fn test_concurrent_saves_do_not_interleave() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(tmp.path().join("feeds.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let snapshot = if i % 2 == 0 { catalog() } else { Catalog::default() };
                    store.save(&snapshot).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let restored = store.load().await.unwrap();
        assert!(restored.is_empty() || restored.len() == 2);
    }
}
