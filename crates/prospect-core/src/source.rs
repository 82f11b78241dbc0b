use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// One scraped document as it appears on a JSONL line. Scrapers disagree
/// about field placement, so identity and text fall back to nested
/// `metadata` keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub doc_id: Value,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl RawDocument {
    /// Resolve a stable document UUID.
    ///
    /// Explicit UUID values pass through; any other non-empty identifier
    /// derives a v5 UUID in the URL namespace; documents without an
    /// identifier fall back to the url, then the leading text, and only a
    /// document with none of those gets a random id.
    #[must_use]
    pub fn resolve_id(&self) -> Uuid {
        let candidates = [
            id_string(&self.id),
            id_string(&self.doc_id),
            self.meta_id("id"),
            self.meta_id("doc_id"),
        ];
        for candidate in candidates.into_iter().flatten() {
            return Uuid::parse_str(&candidate)
                .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_URL, candidate.as_bytes()));
        }

        if let Some(url) = self.effective_url() {
            return Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes());
        }

        let text = self.effective_text();
        if !text.is_empty() {
            let prefix: String = text.chars().take(1024).collect();
            return Uuid::new_v5(&Uuid::NAMESPACE_OID, prefix.as_bytes());
        }

        Uuid::new_v4()
    }

    #[must_use]
    pub fn effective_url(&self) -> Option<&str> {
        non_empty(self.url.as_deref()).or_else(|| self.meta_str("url"))
    }

    #[must_use]
    pub fn effective_title(&self) -> Option<&str> {
        non_empty(self.title.as_deref()).or_else(|| self.meta_str("title"))
    }

    #[must_use]
    pub fn effective_text(&self) -> &str {
        non_empty(self.text.as_deref())
            .or_else(|| self.meta_str("text"))
            .unwrap_or_default()
    }

    /// Natural-key hash over the document body, falling back to the url
    /// so an empty scrape still dedupes.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let text = self.effective_text();
        if text.is_empty() {
            compute_hash(self.effective_url().unwrap_or_default())
        } else {
            compute_hash(text)
        }
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        non_empty(self.metadata.get(key).and_then(Value::as_str))
    }

    fn meta_id(&self, key: &str) -> Option<String> {
        self.metadata.get(key).and_then(id_string)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn compute_hash(content: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// One line of the source file: its zero-based index and the parse
/// outcome. A malformed line is carried as an error so the caller can
/// record the failure without losing the rest of the batch.
#[derive(Debug)]
pub struct BatchItem {
    pub line_index: usize,
    pub doc: std::result::Result<RawDocument, serde_json::Error>,
}

#[derive(Debug)]
pub struct DocumentBatch {
    /// Line index of the first document in the batch.
    pub start: usize,
    /// Line index one past the last document.
    pub end: usize,
    pub items: Vec<BatchItem>,
}

/// Streaming reader over a JSONL scrape dump.
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate fixed-size batches, skipping the first `offset` lines.
    /// The final batch may be short.
    pub fn batches(&self, offset: usize, batch_size: usize) -> Result<JsonlBatches> {
        let file = File::open(&self.path)
            .map_err(|_| Error::MissingResource(self.path.clone()))?;
        Ok(JsonlBatches {
            lines: BufReader::new(file).lines(),
            next_index: 0,
            offset,
            batch_size: batch_size.max(1),
        })
    }
}

#[derive(Debug)]
pub struct JsonlBatches {
    lines: Lines<BufReader<File>>,
    next_index: usize,
    offset: usize,
    batch_size: usize,
}

impl Iterator for JsonlBatches {
    type Item = Result<DocumentBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut items = Vec::with_capacity(self.batch_size);
        let mut start = None;

        loop {
            let index = self.next_index;
            match self.lines.next() {
                Some(Ok(line)) => {
                    self.next_index += 1;
                    if index < self.offset {
                        continue;
                    }
                    start.get_or_insert(index);
                    items.push(BatchItem {
                        line_index: index,
                        doc: serde_json::from_str(&line),
                    });
                    if items.len() == self.batch_size {
                        break;
                    }
                }
                Some(Err(error)) => return Some(Err(Error::Io(error))),
                None => break,
            }
        }

        let start = start?;
        Some(Ok(DocumentBatch {
            start,
            end: self.next_index,
            items,
        }))
    }
}
