use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::{TemplateContext, Templates};

use super::SourceView;

/// Delivery progress of an item.
///
/// `SentPdf` is terminal: the enriched attachment went out and the item is
/// never handed to a handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    #[default]
    New,
    SentEntry,
    SentPdf,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        self == DeliveryState::SentPdf
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryState::New => "NEW",
            DeliveryState::SentEntry => "SENT_ENTRY",
            DeliveryState::SentPdf => "SENT_PDF",
        };
        f.write_str(name)
    }
}

/// A raw entry from a fetched feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub uri: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub content: Option<String>,
}

/// Notification bodies rendered once when the item is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    id: String,
    link: Option<String>,
    title: Option<String>,
    published: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    #[serde(default)]
    state: DeliveryState,
    #[serde(skip)]
    rendered: Option<Rendered>,
}

/// Composite identity of an entry within a source.
pub fn item_id(source_url: &str, entry: &Entry) -> String {
    fn part(value: &Option<String>) -> &str {
        value.as_deref().unwrap_or("null")
    }

    format!(
        "{}@@{}@@{}@@{}",
        source_url,
        part(&entry.uri),
        part(&entry.link),
        part(&entry.title)
    )
}

impl Item {
    pub fn from_entry(
        source: &SourceView,
        entry: &Entry,
        templates: &Templates,
        seen_at: DateTime<Utc>,
    ) -> Self {
        let context = TemplateContext::new(source, entry);
        let rendered = Rendered {
            text: templates.render_text(&context),
            html: templates.render_html(&context),
        };

        Self {
            id: item_id(&source.url, entry),
            link: entry.link.clone(),
            title: entry.title.clone(),
            published: entry.published,
            last_seen: seen_at,
            state: DeliveryState::New,
            rendered: Some(rendered),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Rendered bodies; `None` for items restored from a snapshot.
    pub fn rendered(&self) -> Option<&Rendered> {
        self.rendered.as_ref()
    }

    pub fn set_state(&mut self, state: DeliveryState) {
        self.state = state;
    }

    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        self.last_seen = seen_at;
    }

    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}>",
            self.title.as_deref().unwrap_or("Untitled"),
            self.link.as_deref().unwrap_or("no link")
        )
    }
}
