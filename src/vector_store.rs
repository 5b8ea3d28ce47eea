//! # VectorStore
//!
//! Semantic search over ingested documents.
//!
//! This module pairs a sentence embedding model with a [`hora`] similarity index. Every
//! document text is embedded into a fixed-dimension vector, the vectors are indexed in
//! ingestion order, and queries are answered by nearest-neighbour search under squared
//! Euclidean distance.
//!
//! ## Responsibilities
//! - **Embedding**: [`TextEmbedder`] abstracts the model. [`SentenceEmbeddingsModel`] runs
//!   all-MiniLM-L6-v2 through Candle; [`HashingEmbedder`] is a deterministic offline fallback.
//! - **Indexing**: [`SimilarityIndex`] is an immutable snapshot (vectors + documents) built
//!   in one go. There is no incremental add: every rebuild replaces the whole snapshot.
//! - **Swapping**: [`EmbeddingIndex`] holds the current snapshot behind a lock and swaps the
//!   pointer after a rebuild, so a concurrent search sees the old or the new index, never a
//!   half-built one.
//! - **Snippets**: each hit carries the first two sentences of its document.
//!
//! ## Scores
//! The score of a hit is a **distance**: lower means more similar.
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use nlq_engine::documents::Document;
//! use nlq_engine::vector_store::{EmbeddingIndex, HashingEmbedder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let index = EmbeddingIndex::new(Arc::new(HashingEmbedder::new(384)));
//! index.build(&[Document {
//!     id: "1".into(),
//!     filename: "alice.txt".into(),
//!     text: "Alice works in Engineering. She writes Python.".into(),
//! }])?;
//! for hit in index.search("who works in engineering", 5)? {
//!     println!("{} {:.3} {}", hit.filename, hit.score, hit.snippet);
//! }
//! # Ok(()) }
//! ```

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::bruteforce_idx::BruteForceIndex;
use hora::index::bruteforce_params::BruteForceParams;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::documents::Document;

/// Number of leading sentences used as a hit snippet.
pub const SNIPPET_SENTENCES: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("model download failed: {0}")]
    Download(#[from] hf_hub::api::sync::ApiError),

    #[error("model inference failed: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("failed to read model files: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index error: {0}")]
    Index(&'static str),
}

/// Turns text into a fixed-dimension vector.
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Build the embedder selected by configuration.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::MiniLm => Ok(Arc::new(SentenceEmbeddingsModel::load(config)?)),
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub
    pub fn load(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        );
        let api = Api::new()?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let bert_config = std::fs::read_to_string(config_filename)?;
        let bert_config: Config = serde_json::from_str(&bert_config)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        // SAFETY: the safetensors file is owned by the hf-hub cache and not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &bert_config)?;

        info!("Loaded embedding model {}", config.model_id);
        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.dimension,
        })
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor, EmbeddingError> {
        // embeddings: [1, seq_len, hidden], mask broadcast as [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    /// L2 normalize the embedding vector
    fn normalize(&self, tensor: &Tensor) -> Result<Tensor, EmbeddingError> {
        let norm = tensor
            .sqr()?
            .sum_all()?
            .sqrt()?
            .clamp(f32::EPSILON, f32::INFINITY)?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl TextEmbedder for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;

        let vector = embedding.to_vec1::<f32>()?;
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Each lower-cased alphanumeric token is hashed with BLAKE3 into a bucket and a sign; the
/// result is L2-normalised. Texts sharing words end up close to each other. Empty text maps
/// to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl TextEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimension];

        for word in text.unicode_words() {
            let token = word.to_lowercase();
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// One document's vector, as produced at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub document_id: String,
    pub vector: Vec<f32>,
}

/// A search result. `score` is a squared Euclidean distance (lower is better).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub filename: String,
    pub score: f32,
    pub snippet: String,
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// The first `SNIPPET_SENTENCES` sentences of `text`, trimmed and space-joined.
pub fn snippet(text: &str) -> String {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(SNIPPET_SENTENCES)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable index snapshot: one vector per document, position = ingestion order.
pub struct SimilarityIndex {
    index: BruteForceIndex<f32, usize>,
    dimension: usize,
    documents: Vec<Document>,
}

impl SimilarityIndex {
    /// Build a snapshot. Returns `Ok(None)` for an empty batch (the "absent" index).
    pub fn build(
        documents: Vec<Document>,
        vectors: Vec<EmbeddingVector>,
        dimension: usize,
    ) -> Result<Option<Self>, EmbeddingError> {
        if documents.is_empty() {
            return Ok(None);
        }

        let mut index = BruteForceIndex::<f32, usize>::new(dimension, &BruteForceParams::default());
        for (position, embedding) in vectors.iter().enumerate() {
            if embedding.vector.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.vector.len(),
                });
            }
            index.add(&embedding.vector, position).map_err(EmbeddingError::Index)?;
        }
        index.build(Metric::Euclidean).map_err(EmbeddingError::Index)?;

        Ok(Some(Self {
            index,
            dimension,
            documents,
        }))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Exact k nearest neighbours of `query`, ordered by distance then position.
    pub fn nearest(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Brute force over every node, then re-rank with our own metric so that ordering and
        // tie-breaking do not depend on the index internals.
        let mut ranked: Vec<(f32, usize)> = self
            .index
            .search_nodes(query, self.documents.len())
            .into_iter()
            .filter_map(|(node, _)| {
                let position = (*node.idx())?;
                (position < self.documents.len())
                    .then(|| (squared_euclidean(node.vectors(), query), position))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(score, position)| {
                let document = &self.documents[position];
                SearchHit {
                    document_id: document.id.clone(),
                    filename: document.filename.clone(),
                    score,
                    snippet: snippet(&document.text),
                }
            })
            .collect())
    }
}

/// Document embedding index with atomic rebuilds.
pub struct EmbeddingIndex {
    embedder: Arc<dyn TextEmbedder>,
    current: RwLock<Option<Arc<SimilarityIndex>>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            embedder,
            current: RwLock::new(None),
        }
    }

    /// Embed a single text with the index's model.
    pub fn embed_text_to_vector(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedder.embed(text)
    }

    /// Discard the current index and build a new one from `documents`.
    ///
    /// The replacement is constructed without holding the lock and installed with a single
    /// swap. On error the previous index stays in place. Returns the number of entries.
    pub fn build(&self, documents: &[Document]) -> Result<usize, EmbeddingError> {
        let vectors = documents
            .par_iter()
            .map(|doc| {
                Ok(EmbeddingVector {
                    document_id: doc.id.clone(),
                    vector: self.embedder.embed(&doc.text)?,
                })
            })
            .collect::<Result<Vec<_>, EmbeddingError>>()?;

        let snapshot =
            SimilarityIndex::build(documents.to_vec(), vectors, self.embedder.dimension())?;
        let size = snapshot.as_ref().map_or(0, SimilarityIndex::len);

        *self.current.write() = snapshot.map(Arc::new);
        info!("Rebuilt embedding index with {} documents", size);
        Ok(size)
    }

    /// The `top_k` documents closest to `query`. An absent index yields no hits.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        let Some(snapshot) = self.current.read().clone() else {
            debug!("Search against absent index");
            return Ok(Vec::new());
        };

        let vector = self.embedder.embed(query)?;
        snapshot.nearest(&vector, top_k)
    }

    pub fn len(&self) -> usize {
        self.current.read().as_ref().map_or(0, |s| s.len())
    }

    pub fn is_built(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{id}.txt"),
            text: text.to_string(),
        }
    }

    fn hashing_index() -> EmbeddingIndex {
        EmbeddingIndex::new(Arc::new(HashingEmbedder::new(64)))
    }

    #[test]
    fn test_snippet_takes_first_two_sentences() {
        assert_eq!(
            snippet("Alice works in Engineering. She writes Python. She likes tea."),
            "Alice works in Engineering. She writes Python."
        );
        assert_eq!(snippet("One sentence only"), "One sentence only");
        assert_eq!(snippet(""), "");
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed("Rust is cool").unwrap();
        let b = embedder.embed("rust IS cool").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed("").unwrap();
        assert!(empty.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_squared_euclidean() {
        assert_eq!(squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_euclidean(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_search_absent_index_is_empty() {
        let index = hashing_index();
        assert!(!index.is_built());
        assert!(index.search("anything", 5).unwrap().is_empty());

        assert_eq!(index.build(&[]).unwrap(), 0);
        assert!(!index.is_built());
        assert!(index.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn test_single_document_scenario() {
        let index = hashing_index();
        index
            .build(&[doc("alice", "Alice works in Engineering. She writes Python.")])
            .unwrap();

        let hits = index.search("who works in engineering", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "alice");
        assert_eq!(hits[0].filename, "alice.txt");
        assert_eq!(hits[0].snippet, "Alice works in Engineering. She writes Python.");
        assert!(hits[0].score >= 0.0);
    }

    #[test]
    fn test_search_returns_at_most_k_distinct_documents() {
        let index = hashing_index();
        let docs = vec![
            doc("a", "Kubernetes cluster operations"),
            doc("b", "Python data pipelines"),
            doc("c", ""),
        ];
        assert_eq!(index.build(&docs).unwrap(), 3);
        assert_eq!(index.len(), 3);

        let hits = index.search("python pipelines", 10).unwrap();
        assert_eq!(hits.len(), 3);
        let ids: HashSet<_> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(hits[0].document_id, "b");
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));

        let empty_doc = hits.iter().find(|h| h.document_id == "c").unwrap();
        assert_eq!(empty_doc.snippet, "");

        assert_eq!(index.search("python", 1).unwrap().len(), 1);
        assert!(index.search("python", 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_ingestion_order() {
        let index = hashing_index();
        index
            .build(&[doc("first", "same words"), doc("second", "same words")])
            .unwrap();
        let hits = index.search("unrelated query", 2).unwrap();
        assert_eq!(hits[0].document_id, "first");
        assert_eq!(hits[1].document_id, "second");
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_rebuild_replaces_previous_index() {
        let index = hashing_index();
        index.build(&[doc("old", "old text")]).unwrap();
        index
            .build(&[doc("new1", "new text"), doc("new2", "newer text")])
            .unwrap();

        let hits = index.search("text", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.document_id != "old"));

        index.clear();
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let result = SimilarityIndex::build(
            vec![doc("a", "x")],
            vec![EmbeddingVector {
                document_id: "a".into(),
                vector: vec![0.0; 3],
            }],
            4,
        );
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 from Hugging Face"]
    fn test_sentence_embeddings_model() {
        let model = SentenceEmbeddingsModel::load(&EmbeddingConfig::default()).unwrap();
        let index = EmbeddingIndex::new(Arc::new(model));
        index
            .build(&[doc("a", "Rust is cool."), doc("b", "I love gardening.")])
            .unwrap();
        let hits = index.search("Programming in Rust is fun.", 1).unwrap();
        assert_eq!(hits[0].document_id, "a");
    }
}
