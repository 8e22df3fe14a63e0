use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use crate::error::Result;
use crate::models::SourceView;

use super::{Notification, Outbox};

const MAX_DIR_NAME: usize = 50;
const ERRORS_DIR: &str = "errors";

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

/// Writes each notification as a set of files under a per-source directory.
pub struct FileOutbox {
    root: PathBuf,
    counter: AtomicU64,
}

impl FileOutbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_stem(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:04}", Utc::now().format("%Y%m%dT%H%M%S%.3f"), n)
    }

    async fn directory_for(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(dir_name(name));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

/// The plain-text body preceded by mail-style headers. Items without a
/// publication date are stamped with the time of writing.
fn text_document(notification: &Notification) -> String {
    let date = notification.sent_at.unwrap_or_else(Utc::now);
    let mut doc = format!(
        "From: {}\nSubject: {}\nDate: {}\n",
        notification.sender,
        notification.subject,
        date.to_rfc2822()
    );
    if let Some(attachment) = &notification.attachment {
        doc.push_str(&format!(
            "Attachment: {} ({})\n",
            attachment.file_name, attachment.content_type
        ));
    }
    doc.push('\n');
    doc.push_str(&notification.text);
    doc
}

/// Replaces characters that are unsafe in file names and caps the length.
fn dir_name(title: &str) -> String {
    let re = UNSAFE_CHARS.get_or_init(|| {
        Regex::new(r#"[/\n\r\t\x00\x0c`?*\\<>|":]"#).expect("valid file name pattern")
    });
    let cleaned = re.replace_all(title.trim(), "!");
    let name: String = cleaned.chars().take(MAX_DIR_NAME).collect();
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

#[async_trait]
impl Outbox for FileOutbox {
    async fn send(&self, source: &SourceView, notification: &Notification) -> Result<()> {
        let dir = self.directory_for(&source.title).await?;
        let stem = self.next_stem();

        tokio::fs::write(dir.join(format!("{}.txt", stem)), text_document(notification)).await?;
        tokio::fs::write(dir.join(format!("{}.html", stem)), &notification.html).await?;

        if let Some(attachment) = &notification.attachment {
            let path = dir.join(format!("{}-{}", stem, attachment.file_name));
            tokio::fs::write(path, &attachment.data).await?;
        }

        tracing::debug!(
            source = %source.url,
            subject = %notification.subject,
            "Wrote notification to {}",
            dir.display()
        );
        Ok(())
    }

    async fn send_error(&self, source: &SourceView, message: &str) -> Result<()> {
        let dir = self.directory_for(ERRORS_DIR).await?;
        let path = dir.join(format!("{}.txt", self.next_stem()));
        tokio::fs::write(path, format!("{}\n{}\n", source.title, message)).await?;
        Ok(())
    }
}
