use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Item;

const TITLE_SEPARATOR: &str = " / ";
const DEFAULT_ENCODING: &str = "utf-8";

/// One subscribed feed. Identity is the URL alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    url: String,
    user_title: Vec<String>,
    #[serde(
        default,
        serialize_with = "serialize_items",
        deserialize_with = "deserialize_items"
    )]
    items: HashMap<String, Item>,
    #[serde(skip)]
    title: Option<String>,
    #[serde(skip)]
    encoding: Option<String>,
}

/// Read-only snapshot of the presentation fields of a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceView {
    pub url: String,
    pub title: String,
    pub user_title: String,
}

impl Source {
    pub fn new(url: impl Into<String>, user_title: Vec<String>) -> Self {
        Self {
            url: url.into(),
            user_title,
            items: HashMap::new(),
            title: None,
            encoding: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg(test)]
    pub fn user_title_path(&self) -> &[String] {
        &self.user_title
    }

    pub fn user_title(&self) -> String {
        self.user_title.join(TITLE_SEPARATOR)
    }

    /// Document title from the last fetch, falling back to the subscription title.
    pub fn title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => self.user_title(),
        }
    }

    pub fn encoding(&self) -> &str {
        match self.encoding.as_deref() {
            Some(encoding) if !encoding.is_empty() => encoding,
            _ => DEFAULT_ENCODING,
        }
    }

    pub fn set_document_info(&mut self, title: Option<String>, encoding: Option<String>) {
        self.title = title;
        self.encoding = encoding;
    }

    pub fn items(&self) -> &HashMap<String, Item> {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut HashMap<String, Item> {
        &mut self.items
    }

    #[cfg(test)]
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id().to_string(), item);
    }

    /// Takes over the item cache of `previous`, keeping this source's title path.
    pub fn adopt_items(&mut self, previous: Source) {
        self.items = previous.items;
    }

    pub fn view(&self) -> SourceView {
        SourceView {
            url: self.url.clone(),
            title: self.title(),
            user_title: self.user_title(),
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Source {}

fn serialize_items<S>(items: &HashMap<String, Item>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut sorted: Vec<&Item> = items.values().collect();
    sorted.sort();
    sorted.serialize(serializer)
}

fn deserialize_items<'de, D>(deserializer: D) -> Result<HashMap<String, Item>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Vec::<Item>::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .map(|item| (item.id().to_string(), item))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::tests::entry;
    use crate::models::DeliveryState;
    use crate::services::Templates;
    use chrono::Utc;

    fn source() -> Source {
        Source::new(
            "https://example.com/feed",
            vec!["Tech".to_string(), "Example".to_string()],
        )
    }

    #[test]
    fn test_identity_is_url_only() {
        let a = source();
        let mut b = Source::new("https://example.com/feed", vec!["Renamed".to_string()]);
        b.set_document_info(Some("Other".to_string()), None);
        assert_eq!(a, b);
        assert_ne!(a, Source::new("https://example.com/other", vec![]));
    }

    #[test]
    fn test_titles() {
        let mut s = source();
        assert_eq!(s.user_title(), "Tech / Example");
        assert_eq!(s.title(), "Tech / Example");
        assert_eq!(s.encoding(), "utf-8");

        s.set_document_info(Some("Example Blog".to_string()), Some("koi8-r".to_string()));
        assert_eq!(s.title(), "Example Blog");
        assert_eq!(s.encoding(), "koi8-r");
        assert_eq!(s.view().user_title, "Tech / Example");
    }

    #[test]
    fn test_snapshot_fields_round_trip() {
        let mut s = source();
        s.set_document_info(Some("Transient".to_string()), None);
        let templates = Templates::default();
        let mut item = Item::from_entry(
            &s.view(),
            &entry("urn:1", "https://example.com/1", "One"),
            &templates,
            Utc::now(),
        );
        item.set_state(DeliveryState::SentEntry);
        s.insert_item(item.clone());

        let json = serde_json::to_string(&s).unwrap();
        let restored: Source = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.url(), s.url());
        assert_eq!(restored.user_title_path(), s.user_title_path());
        let restored_item = restored.item(item.id()).unwrap();
        assert_eq!(restored_item.state(), DeliveryState::SentEntry);
        assert_eq!(restored_item.last_seen(), item.last_seen());
        assert_eq!(restored_item.link(), Some("https://example.com/1"));
        assert!(restored_item.rendered().is_none());
        // document title is refreshed by each fetch, not persisted
        assert_eq!(restored.title(), "Tech / Example");
    }
}
