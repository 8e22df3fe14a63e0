use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;

/// Only outlines of this type with an `xmlUrl` are treated as feeds.
const FEED_OUTLINE_TYPE: &str = "rss";

/// One node of a parsed subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionNode {
    pub title: String,
    pub kind: Option<String>,
    pub xml_url: Option<String>,
    pub children: Vec<SubscriptionNode>,
}

impl SubscriptionNode {
    /// The feed URL, if this node is a subscribed feed.
    pub fn feed_url(&self) -> Option<&str> {
        match (self.kind.as_deref(), self.xml_url.as_deref()) {
            (Some(FEED_OUTLINE_TYPE), Some(url)) => Some(url),
            _ => None,
        }
    }
}

impl From<&Outline> for SubscriptionNode {
    fn from(outline: &Outline) -> Self {
        Self {
            title: outline
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| outline.text.clone()),
            kind: outline.r#type.clone(),
            xml_url: outline.xml_url.clone(),
            children: outline.outlines.iter().map(SubscriptionNode::from).collect(),
        }
    }
}

pub fn parse_opml(content: &str) -> Result<Vec<SubscriptionNode>> {
    let document = OPML::from_str(content)?;
    Ok(document
        .body
        .outlines
        .iter()
        .map(SubscriptionNode::from)
        .collect())
}

pub fn parse_opml_file(path: &Path) -> Result<Vec<SubscriptionNode>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}
