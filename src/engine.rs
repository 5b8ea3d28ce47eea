//! # Retrieval orchestration
//!
//! [`RetrievalOrchestrator`] is one query session: a schema catalog, the uploaded documents
//! and their embedding index, an answer cache and a history log. A question flows through
//! it as follows:
//!
//! 1. cache lookup by the exact question text (a hit skips everything else);
//! 2. classification into structured / unstructured / hybrid;
//! 3. the structured path translates the question into a read query and runs it;
//! 4. the unstructured path runs a nearest-neighbour search over the documents;
//! 5. the merged result is cached and a history record is prepended.
//!
//! Failures on either path are reported inside the result, never as an `Err`, so a hybrid
//! question still gets document hits when its query fails.
//!
//! ```no_run
//! use nlq_engine::config::EngineConfig;
//! use nlq_engine::engine::RetrievalOrchestrator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = RetrievalOrchestrator::connect(&EngineConfig::default())?;
//! let answer = engine.answer("How many employees are there?");
//! println!("{}", serde_json::to_string_pretty(&answer)?);
//! # Ok(())
//! # }
//! ```

use chrono::{Datelike, Duration, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::*;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::catalog::{CatalogError, Row, SchemaCatalog, SchemaSnapshot, SqliteCatalog};
use crate::classifier::{QueryClassifier, QueryType};
use crate::config::EngineConfig;
use crate::documents::{DocumentStore, PlainTextExtractor, StoredDocument, TextExtractor, Upload};
use crate::history::{HistoryLog, HistoryRecord};
use crate::translator::QueryTranslator;
use crate::vector_store::{build_embedder, EmbeddingError, EmbeddingIndex, SearchHit, TextEmbedder};

/// Reported under `structured` when no template recognises the question.
pub const TRANSLATION_MISS: &str = "could not translate";

/// Number of column suggestions logged on a translation miss.
const MISS_SUGGESTIONS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// The `query_type` reported with an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Cached,
    Structured,
    Unstructured,
    Hybrid,
}

impl From<QueryType> for ResponseKind {
    fn from(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Structured => ResponseKind::Structured,
            QueryType::Unstructured => ResponseKind::Unstructured,
            QueryType::Hybrid => ResponseKind::Hybrid,
        }
    }
}

/// Rows, or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StructuredOutcome {
    Rows(Vec<Row>),
    Failed { error: String },
}

/// Search hits, or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UnstructuredOutcome {
    Hits(Vec<SearchHit>),
    Failed { error: String },
}

/// Merged output of the retrieval paths. A path that was not taken is `None` (`null`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub structured: Option<StructuredOutcome>,
    pub unstructured: Option<UnstructuredOutcome>,
}

/// What [`RetrievalOrchestrator::answer`] returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// `true` when the result was served from the cache without recomputation.
    pub from_cache: bool,

    /// Wall-clock seconds spent answering, rounded to 4 decimals; `0.0` on a cache hit.
    pub elapsed_secs: f64,

    /// How the question was routed, or [`ResponseKind::Cached`].
    pub query_type: ResponseKind,

    pub result: RetrievalResult,
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// One entry per upload, in upload order.
    pub processed: Vec<StoredDocument>,

    /// Size of the rebuilt index, i.e. every document stored so far.
    pub total_indexed: usize,
}

fn round4(secs: f64) -> f64 {
    (secs * 10_000.0).round() / 10_000.0
}

/// One query session.
///
/// Owns the catalog connection, the document collection and its index, the answer cache and
/// the history log. It is `Send + Sync`; share it by reference or behind an `Arc`.
/// Ingestion and [`reset`](Self::reset) are serialised against each other; questions can be
/// answered concurrently with both.
pub struct RetrievalOrchestrator {
    catalog: Arc<dyn SchemaCatalog>,
    schema: RwLock<SchemaSnapshot>,
    documents: RwLock<DocumentStore>,
    extractor: Arc<dyn TextExtractor>,
    index: EmbeddingIndex,
    classifier: QueryClassifier,
    translator: QueryTranslator,
    cache: TtlCache<RetrievalResult>,
    history: HistoryLog,
    clock: Arc<dyn Clock>,
    search_top_k: usize,
    ingest_lock: Mutex<()>,
}

impl RetrievalOrchestrator {
    /// Assemble a session from its collaborators. Reads the schema snapshot once.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] if `cache_ttl_secs` is outside the representable range.
    /// - [`EngineError::Catalog`] if the schema cannot be read.
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<dyn SchemaCatalog>,
        embedder: Arc<dyn TextEmbedder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let ttl = Duration::try_seconds(config.cache_ttl_secs).ok_or_else(|| {
            EngineError::Config(format!(
                "cache_ttl_secs {} is out of range",
                config.cache_ttl_secs
            ))
        })?;
        let schema = catalog.get_tables()?;
        info!("Schema snapshot has {} tables", schema.len());

        Ok(Self {
            catalog,
            schema: RwLock::new(schema),
            documents: RwLock::new(DocumentStore::new()),
            extractor: Arc::new(PlainTextExtractor),
            index: EmbeddingIndex::new(embedder),
            classifier: QueryClassifier::from_config(&config.classifier),
            translator: QueryTranslator::from_config(&config.translator),
            cache: TtlCache::new(ttl, clock.clone()),
            history: HistoryLog::new(config.history_limit),
            clock,
            search_top_k: config.search_top_k,
            ingest_lock: Mutex::new(()),
        })
    }

    /// Open the configured SQLite database and embedding backend.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened, the embedding model cannot be loaded, or the
    /// configuration is rejected by [`Self::new`].
    pub fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let catalog = SqliteCatalog::open(&config.database_url)?;
        let embedder = build_embedder(&config.embedding)?;
        Self::new(config, Arc::new(catalog), embedder, Arc::new(SystemClock))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Store a batch of uploads and rebuild the index over every document once.
    ///
    /// Cached answers are dropped afterwards, whether or not the rebuild succeeded.
    ///
    /// # Errors
    ///
    /// Returns the [`EmbeddingError`] of a failed rebuild. The uploads stay stored and the
    /// previous index keeps serving searches.
    pub fn ingest_documents(&self, uploads: &[Upload]) -> Result<IngestReport, EmbeddingError> {
        let _guard = self.ingest_lock.lock();

        let processed = self
            .documents
            .write()
            .ingest_batch(uploads, self.extractor.as_ref());
        let snapshot = self.documents.read().documents().to_vec();

        let built = self.index.build(&snapshot);
        self.cache.clear();
        let total_indexed = built?;

        info!(
            "Ingested {} documents ({} indexed)",
            processed.len(),
            total_indexed
        );
        Ok(IngestReport {
            processed,
            total_indexed,
        })
    }

    /// Answer `question` from the cache or by running the retrieval paths it is routed to.
    ///
    /// Never fails: a query that cannot be translated or executed, or a search that cannot
    /// embed the question, is reported inside the corresponding part of the result.
    pub fn answer(&self, question: &str) -> Answer {
        let started = Instant::now();

        if let Some(result) = self.cache.get(question) {
            debug!("Cache hit: {:?}", question);
            return Answer {
                from_cache: true,
                elapsed_secs: 0.0,
                query_type: ResponseKind::Cached,
                result,
            };
        }

        let query_type = self.classifier.classify(question);
        debug!("Classified {:?} as {}", question, query_type);

        let mut result = RetrievalResult::default();
        if query_type.includes_structured() {
            result.structured = Some(self.run_structured(question));
        }
        if query_type.includes_unstructured() {
            result.unstructured = Some(self.run_unstructured(question));
        }

        let elapsed_secs = round4(started.elapsed().as_secs_f64());

        self.cache.insert(question, result.clone());
        self.history.record(HistoryRecord {
            question: question.to_string(),
            query_type,
            elapsed_secs,
            recorded_at: self.clock.now(),
        });

        Answer {
            from_cache: false,
            elapsed_secs,
            query_type: query_type.into(),
            result,
        }
    }

    fn run_structured(&self, question: &str) -> StructuredOutcome {
        let year = self.clock.now().with_timezone(&Local).year();
        let translation = {
            let schema = self.schema.read();
            match self.translator.translate_in_year(question, &schema, year) {
                Some(translation) => translation,
                None => {
                    let suggestions = self.translator.suggest_columns_for_question(
                        question,
                        &schema,
                        MISS_SUGGESTIONS,
                    );
                    debug!("No template for {:?}; closest columns: {:?}", question, suggestions);
                    return StructuredOutcome::Failed {
                        error: TRANSLATION_MISS.to_string(),
                    };
                }
            }
        };

        match self.catalog.execute_read_query(&translation.query) {
            Ok(rows) => {
                debug!("{} returned {} rows", translation.template, rows.len());
                StructuredOutcome::Rows(rows)
            }
            Err(e) => {
                warn!("Query for {:?} failed: {}", question, e);
                StructuredOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn run_unstructured(&self, question: &str) -> UnstructuredOutcome {
        match self.index.search(question, self.search_top_k) {
            Ok(hits) => UnstructuredOutcome::Hits(hits),
            Err(e) => {
                error!("Document search failed: {}", e);
                UnstructuredOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Answered questions, newest first. Cache hits are not recorded.
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.snapshot()
    }

    pub fn schema(&self) -> SchemaSnapshot {
        self.schema.read().clone()
    }

    /// Re-read table metadata from the catalog. Returns the number of tables.
    pub fn refresh_schema(&self) -> Result<usize, CatalogError> {
        let schema = self.catalog.get_tables()?;
        let tables = schema.len();
        *self.schema.write() = schema;
        self.cache.clear();
        info!("Schema refreshed: {} tables", tables);
        Ok(tables)
    }

    pub fn indexed_count(&self) -> usize {
        self.index.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    /// Forget documents, index, cached answers and history. The catalog stays open.
    pub fn reset(&self) {
        let _guard = self.ingest_lock.lock();
        self.documents.write().clear();
        self.index.clear();
        self.cache.clear();
        self.history.clear();
        info!("Session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::catalog::tests::sample_catalog;
    use crate::config::TranslatorConfig;
    use crate::vector_store::HashingEmbedder;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        engine: RetrievalOrchestrator,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let (dir, catalog) = sample_catalog();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
        let engine = RetrievalOrchestrator::new(
            &config,
            Arc::new(catalog),
            Arc::new(HashingEmbedder::new(256)),
            clock.clone(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            clock,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default())
    }

    fn rows(answer: &Answer) -> &[Row] {
        match &answer.result.structured {
            Some(StructuredOutcome::Rows(rows)) => rows,
            other => panic!("expected rows, got {other:?}"),
        }
    }

    fn hits(answer: &Answer) -> &[SearchHit] {
        match &answer.result.unstructured {
            Some(UnstructuredOutcome::Hits(hits)) => hits,
            other => panic!("expected hits, got {other:?}"),
        }
    }

    #[test]
    fn test_count_question() {
        let f = fixture();
        let answer = f.engine.answer("how many employees are there");
        assert!(!answer.from_cache);
        assert_eq!(answer.query_type, ResponseKind::Structured);
        assert_eq!(rows(&answer).len(), 1);
        assert_eq!(rows(&answer)[0]["count"], json!(5));
        assert!(answer.result.unstructured.is_none());
    }

    #[test]
    fn test_top_paid_question() {
        let f = fixture();
        let answer = f.engine.answer("top 3 highest paid employees");
        let names: Vec<&str> = rows(&answer)
            .iter()
            .map(|row| row["full_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["David Kim", "Alice Johnson", "Carol Lee"]);
    }

    #[test]
    fn test_hired_this_year_follows_clock() {
        let f = fixture();
        let answer = f.engine.answer("who was hired this year");
        let names: Vec<&str> = rows(&answer)
            .iter()
            .map(|row| row["full_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Bob Smith"]);
    }

    #[test]
    fn test_document_question_skips_structured_path() {
        let f = fixture();
        let answer = f.engine.answer("Which resumes mention Kubernetes?");
        assert_eq!(answer.query_type, ResponseKind::Unstructured);
        assert!(answer.result.structured.is_none());
        assert!(hits(&answer).is_empty());
    }

    #[test]
    fn test_translation_miss_is_reported() {
        let f = fixture();
        let answer = f.engine.answer("tell me a joke");
        assert_eq!(answer.query_type, ResponseKind::Hybrid);
        assert_eq!(
            answer.result.structured,
            Some(StructuredOutcome::Failed {
                error: TRANSLATION_MISS.to_string()
            })
        );
        assert!(hits(&answer).is_empty());
    }

    #[test]
    fn test_execution_error_is_reported() {
        let mut config = EngineConfig::default();
        config.translator = TranslatorConfig {
            table: "payroll_archive_2009".to_string(),
            ..TranslatorConfig::default()
        };
        let f = fixture_with(config);
        let answer = f.engine.answer("how many employees are there");
        match answer.result.structured {
            Some(StructuredOutcome::Failed { error }) => assert!(error.contains("no such table")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_translation_miss_keeps_document_hits() {
        let f = fixture();
        f.engine
            .ingest_documents(&[Upload::new(
                "alice.txt",
                "Alice works in Engineering. She writes Python.",
            )])
            .unwrap();

        let answer = f.engine.answer("who works in engineering");
        assert_eq!(answer.query_type, ResponseKind::Hybrid);
        assert_eq!(
            answer.result.structured,
            Some(StructuredOutcome::Failed {
                error: TRANSLATION_MISS.to_string()
            })
        );
        let hits = hits(&answer);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "alice.txt");
        assert_eq!(hits[0].snippet, "Alice works in Engineering. She writes Python.");
    }

    #[test]
    fn test_execution_error_keeps_document_hits() {
        let mut config = EngineConfig::default();
        // No structured vocabulary: every non-document question is hybrid.
        config.classifier.structured_terms = Vec::new();
        config.translator.table = "payroll_archive_2009".to_string();
        let f = fixture_with(config);
        f.engine
            .ingest_documents(&[Upload::new(
                "alice.txt",
                "Alice works in Engineering. She writes Python.",
            )])
            .unwrap();

        let answer = f.engine.answer("how many employees are there");
        assert_eq!(answer.query_type, ResponseKind::Hybrid);
        match &answer.result.structured {
            Some(StructuredOutcome::Failed { error }) => assert!(error.contains("no such table")),
            other => panic!("expected failure, got {other:?}"),
        }
        let hits = hits(&answer);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "Alice works in Engineering. She writes Python.");
    }

    #[test]
    fn test_out_of_range_ttl() {
        let (_dir, catalog) = sample_catalog();
        let config = EngineConfig {
            cache_ttl_secs: i64::MAX,
            ..EngineConfig::default()
        };
        let result = RetrievalOrchestrator::new(
            &config,
            Arc::new(catalog),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));

        // Representable, but the deadline lies past the calendar's end.
        let f = fixture_with(EngineConfig {
            cache_ttl_secs: 1_000_000_000_000_000,
            ..EngineConfig::default()
        });
        assert!(!f.engine.answer("how many employees are there").from_cache);
        f.clock.advance(Duration::days(365 * 100));
        assert!(f.engine.answer("how many employees are there").from_cache);
    }

    #[test]
    fn test_cache_hit_then_expiry() {
        let f = fixture();
        let first = f.engine.answer("how many employees are there");

        f.clock.advance(Duration::seconds(299));
        let second = f.engine.answer("how many employees are there");
        assert!(second.from_cache);
        assert_eq!(second.query_type, ResponseKind::Cached);
        assert_eq!(second.elapsed_secs, 0.0);
        assert_eq!(second.result, first.result);
        assert_eq!(f.engine.history().len(), 1);

        f.clock.advance(Duration::seconds(1));
        let third = f.engine.answer("how many employees are there");
        assert!(!third.from_cache);
        assert_eq!(third.query_type, ResponseKind::Structured);
        assert_eq!(f.engine.history().len(), 2);
    }

    #[test]
    fn test_ingest_then_search() {
        let f = fixture();
        let report = f
            .engine
            .ingest_documents(&[Upload::new(
                "alice.txt",
                "Alice works in Engineering. She writes Python.",
            )])
            .unwrap();
        assert_eq!(report.total_indexed, 1);
        assert_eq!(report.processed[0].filename, "alice.txt");
        assert_eq!(f.engine.indexed_count(), 1);

        let answer = f.engine.answer("Which resume mentions Python?");
        let hits = hits(&answer);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, report.processed[0].document_id);
        assert_eq!(hits[0].snippet, "Alice works in Engineering. She writes Python.");
    }

    #[test]
    fn test_ingest_invalidates_cache() {
        let f = fixture();
        let before = f.engine.answer("any resume about rust?");
        assert!(hits(&before).is_empty());

        f.engine
            .ingest_documents(&[
                Upload::new("a.txt", "Rust systems programming."),
                Upload::new("b.txt", "Gardening notes."),
            ])
            .unwrap();

        let after = f.engine.answer("any resume about rust?");
        assert!(!after.from_cache);
        assert_eq!(hits(&after).len(), 2);
        assert_eq!(f.engine.document_count(), 2);
    }

    #[test]
    fn test_history_is_newest_first() {
        let f = fixture();
        f.engine.answer("how many employees are there");
        f.engine.answer("tell me a joke");
        let history = f.engine.history();
        assert_eq!(history[0].question, "tell me a joke");
        assert_eq!(history[0].query_type, QueryType::Hybrid);
        assert_eq!(history[1].query_type, QueryType::Structured);
    }

    #[test]
    fn test_reset_and_refresh() {
        let f = fixture();
        f.engine
            .ingest_documents(&[Upload::new("a.txt", "hello")])
            .unwrap();
        f.engine.answer("tell me a joke");

        f.engine.reset();
        assert_eq!(f.engine.indexed_count(), 0);
        assert_eq!(f.engine.document_count(), 0);
        assert!(f.engine.history().is_empty());

        assert_eq!(f.engine.refresh_schema().unwrap(), 2);
        assert!(f.engine.schema().contains_key("employees"));
    }

    #[test]
    fn test_answer_serialises_with_null_paths() {
        let f = fixture();
        let value = serde_json::to_value(f.engine.answer("how many employees are there")).unwrap();
        assert_eq!(value["query_type"], json!("structured"));
        assert_eq!(value["from_cache"], json!(false));
        assert_eq!(value["result"]["structured"], json!([{ "count": 5 }]));
        assert_eq!(value["result"]["unstructured"], json!(null));

        let value = serde_json::to_value(f.engine.answer("tell me a joke")).unwrap();
        assert_eq!(value["result"]["structured"], json!({ "error": "could not translate" }));
    }
}
