//! Notification templates.
//!
//! Placeholders use `{{name}}` syntax; `\{{` emits a literal `{{`. Unknown
//! names render as an empty string.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{Entry, SourceView};

const DEFAULT_TEXT: &str = include_str!("../../templates/item.txt");
const DEFAULT_HTML: &str = include_str!("../../templates/item.html");

const TEXT_WIDTH: usize = 80;

/// Values visible to a template: a borrowed projection of one source and one entry.
pub struct TemplateContext<'a> {
    source: &'a SourceView,
    entry: &'a Entry,
}

impl<'a> TemplateContext<'a> {
    pub fn new(source: &'a SourceView, entry: &'a Entry) -> Self {
        Self { source, entry }
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "source.url" => Some(self.source.url.clone()),
            "source.title" => Some(self.source.title.clone()),
            "source.user_title" => Some(self.source.user_title.clone()),
            "entry.uri" => self.entry.uri.clone(),
            "entry.link" => self.entry.link.clone(),
            "entry.title" => self.entry.title.clone(),
            "entry.author" => self.entry.author.clone(),
            "entry.published" => self.entry.published.map(|dt| dt.to_rfc2822()),
            "entry.content" => self.entry.content.clone(),
            "entry.text" => self.entry.content.as_deref().map(html_to_text),
            _ => None,
        }
    }
}

fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => text.trim_end().to_string(),
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            html.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Templates {
    text: String,
    html: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT.to_string(),
            html: DEFAULT_HTML.to_string(),
        }
    }
}

impl Templates {
    pub fn new(text: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: html.into(),
        }
    }

    /// Reads template overrides; a path that cannot be read is a fatal error.
    pub fn load(text_path: Option<&Path>, html_path: Option<&Path>) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|e| {
                AppError::Template(format!("cannot read template {}: {}", path.display(), e))
            })
        };

        let text = match text_path {
            Some(path) => read(path)?,
            None => DEFAULT_TEXT.to_string(),
        };
        let html = match html_path {
            Some(path) => read(path)?,
            None => DEFAULT_HTML.to_string(),
        };

        Ok(Self::new(text, html))
    }

    pub fn render_text(&self, context: &TemplateContext) -> String {
        render(&self.text, context)
    }

    pub fn render_html(&self, context: &TemplateContext) -> String {
        render(&self.html, context)
    }
}

fn render(template: &str, context: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if rest[..start].ends_with('\\') {
            out.push_str(&rest[..start - 1]);
            out.push_str("{{");
            rest = &rest[start + 2..];
            continue;
        }

        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = context.lookup(key) {
                    out.push_str(&value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated placeholder
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
