//! # Documents
//!
//! Uploaded documents and the text-extraction collaborator.
//!
//! - [`TextExtractor`] turns raw upload bytes into text. Implementations must never fail:
//!   anything unreadable degrades to lossy or empty text.
//! - [`DocumentStore`] keeps every ingested [`Document`] in ingestion order. That order is the
//!   position order of the embedding index built from it.
//!
//! Extraction of a batch runs in parallel with `rayon`; each upload is independent.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// An ingested document. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub text: String,
}

/// Raw upload handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Best-effort text extraction. Must not panic and must not fail.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], filename: &str) -> String;
}

/// Minimum length of a printable run kept from binary formats.
const MIN_PRINTABLE_RUN: usize = 4;

/// Extractor for plain-text uploads with a printable-text fallback for binary formats.
///
/// `txt`, `csv`, `md` and unknown extensions are decoded as lossy UTF-8. `pdf`, `docx` and
/// `doc` are binary containers; for those only runs of printable characters are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn printable_runs(text: &str) -> String {
        text.split(|c: char| (c.is_control() && !c.is_whitespace()) || c == '\u{FFFD}')
            .map(str::trim)
            .filter(|run| run.chars().count() >= MIN_PRINTABLE_RUN)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> String {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let decoded = String::from_utf8_lossy(bytes);
        let decoded = decoded.strip_prefix('\u{FEFF}').unwrap_or(&*decoded);

        match ext.as_str() {
            "pdf" | "docx" | "doc" => Self::printable_runs(decoded),
            _ => decoded.to_string(),
        }
    }
}

/// Reference to a stored document, as reported back to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub document_id: String,
    pub filename: String,
}

/// All ingested documents, in stable ingestion order.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already-extracted text and return the new document id.
    pub fn push(&mut self, filename: impl Into<String>, text: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.documents.push(Document {
            id: id.clone(),
            filename: filename.into(),
            text: text.into(),
        });
        id
    }

    /// Extract every upload in parallel, then append them in upload order.
    pub fn ingest_batch(
        &mut self,
        uploads: &[Upload],
        extractor: &dyn TextExtractor,
    ) -> Vec<StoredDocument> {
        let texts: Vec<String> = uploads
            .par_iter()
            .map(|upload| extractor.extract(&upload.bytes, &upload.filename))
            .collect();

        uploads
            .iter()
            .zip(texts)
            .map(|(upload, text)| {
                debug!("Extracted {} chars from {}", text.len(), upload.filename);
                let document_id = self.push(upload.filename.clone(), text);
                StoredDocument {
                    document_id,
                    filename: upload.filename.clone(),
                }
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }
}
