//! Ingestion orchestrator: the retrieval engine's one internal API. Composes
//! the parsers, PDF boundary filter,
//! semantic chunker, embedder, vector store, raw-data store, and feedback store
//! behind `ingest_file` / `ingest_data` / `delete` / `list_files` / `status` /
//! `query_documents` / `feedback_*`. Transports (REST, MCP tools, a CLI) are
//! thin adapters over this surface; no RPC envelope is modeled here.

use crate::config::EngineConfig;
use crate::embedder::EmbedBackend;
use crate::error::{RagError, Result};
use crate::feedback::{ChunkRef, EventKind, FeedbackEvent, FeedbackStats, FeedbackStore};
use crate::query::{self, ParsedQuery};
use crate::vector_store::{chunk_id, Chunk, SearchMode, SearchResult, VectorStore};
use crate::{chunker, parsers, pdf, raw_data};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// Custom metadata caps: keys <= 100 chars, values <= 1000 chars.
const MAX_METADATA_KEY_LEN: usize = 100;
const MAX_METADATA_VALUE_LEN: usize = 1000;
/// Query limit cap.
const MAX_QUERY_LIMIT: usize = 20;

pub type CustomMetadata = BTreeMap<String, String>;

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Upserts `db_root` into the user-config recent-databases record with the
/// current timestamp. A hot-swap updates the recent-databases record and only
/// then becomes the visible handle.
/// Best-effort: a write failure here (e.g. no config dir available) must not
/// block opening or swapping in the database itself. Called by the CLI layer
/// after `Engine::open`/before a `DbManager::swap` becomes visible, not from
/// `Engine::open` itself, so constructing an `Engine` in tests never touches
/// the real user-config directory.
pub fn touch_recent_database(db_root: &Path, model_name: &str) {
    let mut recent = crate::config::load_recent_databases();
    let path = db_root.to_path_buf();
    let name = db_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    let entry = crate::config::RecentDatabase {
        path: path.clone(),
        name,
        last_accessed: now_iso8601(),
        model_name: Some(model_name.to_string()),
    };
    recent.databases.retain(|d| d.path != path);
    recent.databases.push(entry);
    if let Err(e) = crate::config::save_recent_databases(&recent) {
        warn!(error = %e, "failed to update recent-databases record");
    }
}

/// Validates custom-metadata caps at the boundary.
pub fn validate_custom_metadata(custom: &CustomMetadata) -> Result<()> {
    for (k, v) in custom {
        if k.len() > MAX_METADATA_KEY_LEN {
            return Err(RagError::validation(format!(
                "metadata key {k:?} exceeds {MAX_METADATA_KEY_LEN} chars"
            )));
        }
        if v.len() > MAX_METADATA_VALUE_LEN {
            return Err(RagError::validation(format!(
                "metadata value for key {k:?} exceeds {MAX_METADATA_VALUE_LEN} chars"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub file_path: String,
    pub chunk_count: usize,
    pub timestamp: String,
}

/// `ingest_data` content formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Html,
    Markdown,
}

#[derive(Debug, Clone)]
pub struct IngestDataMetadata {
    pub source: String,
    pub format: DataFormat,
    pub custom: Option<CustomMetadata>,
}

/// `delete` takes exactly one of `file_path` or `source`.
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    FilePath(String),
    Source(String),
}

#[derive(Debug, Clone)]
pub struct DeleteSummary {
    pub file_path: String,
    pub deleted: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct FileSummary {
    pub file_path: String,
    pub chunk_count: usize,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub document_count: usize,
    pub chunk_count: usize,
    pub memory_usage_bytes: usize,
    pub uptime_secs: u64,
    pub fts_index_enabled: bool,
    pub search_mode: SearchMode,
}

#[derive(Debug, Clone)]
pub struct QueryResultItem {
    pub file_path: String,
    pub chunk_index: u32,
    pub text: String,
    pub score: f32,
    pub source: Option<String>,
    pub metadata: CustomMetadata,
    pub explanation: Option<String>,
}

/// One instance owns one active database: a vector store, an embedder handle,
/// and its own feedback store ("feedback store is a process-wide mutable
/// singleton... its lifetime matches the active database"). At most one
/// `Engine` is ever the visible handle at a time (see `DbManager`), so "one
/// feedback store per process" and "one feedback store per active database"
/// are the same constraint; a swap drops the old `Engine` (and with it its
/// feedback store) and installs a freshly-opened one rather than mutating a
/// `'static` instance in place.
pub struct Engine {
    cfg: EngineConfig,
    db_root: PathBuf,
    store: VectorStore,
    embedder: Arc<dyn EmbedBackend>,
    feedback: FeedbackStore,
    /// Per-`file_path` mutex map enforcing ingest serialization ("a
    /// per-file mutex to avoid interleaved delete/insert storms").
    ingest_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub async fn open(db_root: &Path, cfg: EngineConfig, embedder: Arc<dyn EmbedBackend>) -> Result<Self> {
        let store = VectorStore::open(&db_root.join("chunks.lance"), cfg.vector_store.clone()).await?;
        let feedback = FeedbackStore::new(cfg.feedback.alpha);
        Ok(Self {
            cfg,
            db_root: db_root.to_path_buf(),
            store,
            embedder,
            feedback,
            ingest_locks: DashMap::new(),
        })
    }

    fn lock_for(&self, file_path: &str) -> Arc<Mutex<()>> {
        self.ingest_locks
            .entry(file_path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn parse_by_extension(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("txt") | Some("md") | Some("markdown") => parsers::parse_text(path),
            Some("docx") => parsers::parse_docx(path),
            Some("json") | Some("jsonl") | Some("ndjson") => {
                let raw = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
                parsers::parse_json(&raw)
            }
            Some(other) => Err(RagError::validation(format!(
                "unsupported file extension: {other}"
            ))),
            None => Err(RagError::validation("file has no extension")),
        }
    }

    /// Chunks `text` (sentence-embedding the chunker needs internally) then
    /// embeds the resulting chunk texts, asserting the two lengths match.
    fn chunk_and_embed(&self, text: &str) -> Result<Vec<(usize, String, Vec<f32>)>> {
        let embedder = self.embedder.clone();
        let chunks = chunker::chunk_text(text, &self.cfg.chunker, |sentences| {
            embedder.embed_batch(sentences)
        })?;
        if chunks.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::model(
                "embedder returned a different number of vectors than chunks",
            ));
        }
        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(c, e)| (c.index, c.text, e))
            .collect())
    }

    /// `ingest_file`: validate/parse -> chunk -> embed -> replace.
    /// Re-ingest failure after the old chunks are deleted leaves the file
    /// without chunks; no snapshot/restore is attempted (open question,
    /// resolved: current behavior is the answer).
    pub async fn ingest_file(&self, path: &Path, custom: Option<CustomMetadata>) -> Result<IngestSummary> {
        if let Some(c) = custom.as_ref() {
            validate_custom_metadata(c)?;
        }
        let path_str = path.to_string_lossy().to_string();
        let lock = self.lock_for(&path_str);
        let _guard = lock
            .lock()
            .map_err(|_| RagError::concurrency("ingest lock poisoned"))?;

        let is_raw = raw_data::is_raw_path(&self.db_root, path);
        let text = if is_raw {
            // Raw-data paths are read directly; they were already validated at
            // write time and live outside base_dir by construction.
            parsers::parse_text(path)?
        } else if path.extension().and_then(|e| e.to_str()) == Some("pdf") {
            parsers::validate_path(path, &self.cfg.base_dir, self.cfg.max_file_bytes)?;
            let embedder = self.embedder.clone();
            pdf::parse_pdf(path, &self.cfg.pdf_boundary, |texts| embedder.embed_batch(texts))?
        } else {
            let canonical = parsers::validate_path(path, &self.cfg.base_dir, self.cfg.max_file_bytes)?;
            self.parse_by_extension(&canonical)?
        };

        let chunks = self.chunk_and_embed(&text)?;

        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let timestamp = now_iso8601();
        let custom = custom.unwrap_or_default();

        let rows: Vec<Chunk> = chunks
            .into_iter()
            .map(|(idx, text, embedding)| Chunk {
                id: chunk_id(&path_str, idx as u32),
                file_path: path_str.clone(),
                chunk_index: idx as u32,
                text,
                embedding,
                file_name: file_name.clone(),
                file_size,
                file_type: file_type.clone(),
                custom: custom.clone(),
                timestamp: timestamp.clone(),
            })
            .collect();

        self.store.replace_file_chunks(&path_str, &rows).await?;

        Ok(IngestSummary {
            file_path: path_str,
            chunk_count: rows.len(),
            timestamp,
        })
    }

    /// `ingest_data`: HTML -> Markdown conversion, write via the
    /// raw-data store, then delegate to `ingest_file`. Rolls back the raw-data
    /// write on failure (best-effort: a rollback failure is logged, never
    /// replaces the original error).
    pub async fn ingest_data(&self, content: &str, meta: IngestDataMetadata) -> Result<IngestSummary> {
        if let Some(c) = meta.custom.as_ref() {
            validate_custom_metadata(c)?;
        }
        raw_data::validate_source_scheme(&meta.source)?;

        let text = match meta.format {
            DataFormat::Html => parsers::html_to_markdown(content)?,
            DataFormat::Text | DataFormat::Markdown => content.to_string(),
        };
        if text.trim().is_empty() {
            return Err(RagError::validation("ingest_data content is empty"));
        }

        let path = raw_data::save(&self.db_root, &meta.source, &text)?;

        match self.ingest_file(&path, meta.custom).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                if let Err(rollback_err) = raw_data::delete(&path) {
                    warn!(
                        error = %rollback_err,
                        "raw-data rollback delete failed after ingest failure"
                    );
                }
                Err(err)
            }
        }
    }

    /// Exactly one of `file_path` or `source` must be set.
    /// Idempotent — deleting an unknown file/source is not an error.
    pub async fn delete(&self, target: DeleteTarget) -> Result<DeleteSummary> {
        let (file_path, is_raw) = match &target {
            DeleteTarget::FilePath(p) => {
                let path = Path::new(p);
                if !path.is_absolute() {
                    return Err(RagError::validation("file_path must be absolute"));
                }
                let is_raw = raw_data::is_raw_path(&self.db_root, path);
                if !is_raw {
                    match path.canonicalize() {
                        Ok(canonical) => {
                            let canonical_base = self
                                .cfg
                                .base_dir
                                .canonicalize()
                                .map_err(|e| RagError::io(&self.cfg.base_dir, e))?;
                            if !canonical.starts_with(&canonical_base) {
                                return Err(RagError::validation(
                                    "path must be a descendant of the configured base directory",
                                ));
                            }
                        }
                        // The physical file is already gone; delete of an unknown
                        // file is idempotent, so fall through and clear whatever
                        // chunks remain under this literal path.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(RagError::io(path, e)),
                    }
                }
                (p.clone(), is_raw)
            }
            DeleteTarget::Source(source) => {
                raw_data::validate_source_scheme(source)?;
                let path = raw_data::raw_data_path(&self.db_root, source);
                (path.to_string_lossy().to_string(), true)
            }
        };

        let lock = self.lock_for(&file_path);
        let _guard = lock
            .lock()
            .map_err(|_| RagError::concurrency("delete lock poisoned"))?;

        self.store.delete_file(&file_path).await?;
        if is_raw {
            raw_data::delete(Path::new(&file_path))?;
        }

        Ok(DeleteSummary {
            file_path,
            deleted: true,
            timestamp: now_iso8601(),
        })
    }

    /// `list_files`.
    pub async fn list_files(&self) -> Result<Vec<FileSummary>> {
        let files = self.store.list_files().await?;
        Ok(files
            .into_iter()
            .map(|(file_path, chunk_count)| {
                let source = raw_data::extract_source(&self.db_root, Path::new(&file_path));
                FileSummary {
                    file_path,
                    chunk_count,
                    source,
                }
            })
            .collect())
    }

    /// `status`.
    pub async fn status(&self) -> Result<EngineStatus> {
        let s = self.store.status().await?;
        Ok(EngineStatus {
            document_count: s.document_count,
            chunk_count: s.chunk_count,
            memory_usage_bytes: s.memory_usage_bytes,
            uptime_secs: s.uptime_secs,
            fts_index_enabled: s.fts_index_enabled,
            search_mode: s.search_mode,
        })
    }

    /// `get_document_chunks`, exposed through the engine surface.
    pub async fn get_document_chunks(&self, file_path: &str) -> Result<Vec<Chunk>> {
        self.store.get_document_chunks(file_path).await
    }

    /// `find_related`, exposed through the engine surface.
    pub async fn find_related(
        &self,
        file_path: &str,
        chunk_index: u32,
        limit: usize,
        exclude_same_doc: bool,
    ) -> Result<Vec<SearchResult>> {
        self.store
            .find_related(file_path, chunk_index, limit, exclude_same_doc)
            .await
    }

    /// `query_documents`: parse -> embed -> hybrid search -> feedback
    /// rerank -> post-filter (field filters + exclude terms) -> source
    /// restoration.
    pub async fn query_documents(
        &self,
        query_text: &str,
        limit: usize,
        explain: bool,
    ) -> Result<Vec<QueryResultItem>> {
        if query_text.trim().is_empty() {
            return Err(RagError::validation("query must not be empty"));
        }
        if limit == 0 || limit > MAX_QUERY_LIMIT {
            return Err(RagError::validation(format!(
                "limit must be in 1..={MAX_QUERY_LIMIT}"
            )));
        }

        let parsed = query::parse(query_text);
        let semantic_query = parsed.to_semantic_query();
        let fts_query = parsed.to_fts_query();

        let embed_input = if semantic_query.is_empty() {
            query_text.to_string()
        } else {
            semantic_query
        };
        let query_vec = self.embedder.embed(&embed_input)?;

        // Over-fetch: feedback reranking and post-filtering can both reorder or
        // drop candidates, so ask the store for more than `limit` before the
        // final truncation.
        let fetch_limit = (limit * 4).clamp(limit, 200);
        let fts_query_opt = Some(fts_query.as_str()).filter(|s| !s.is_empty());
        let hits = self.store.search(&query_vec, fts_query_opt, fetch_limit).await?;

        let source_ref = ChunkRef::for_query(query_text);
        let reranked = self.feedback.rerank(hits, &source_ref);
        let filtered = apply_query_filters(reranked, &parsed);

        let hybrid_weight = self.store.hybrid_weight();
        let mut out = Vec::with_capacity(limit.min(filtered.len()));
        for r in filtered.into_iter().take(limit) {
            let source = raw_data::extract_source(&self.db_root, Path::new(&r.file_path));
            let explanation = explain.then(|| {
                format!(
                    "fused score {:.4} (hybrid_weight={:.2}); {} filter(s), {} exclusion(s)",
                    r.score,
                    hybrid_weight,
                    parsed.filters.len(),
                    parsed.exclude_terms.len(),
                )
            });
            out.push(QueryResultItem {
                file_path: r.file_path,
                chunk_index: r.chunk_index,
                text: r.text,
                score: r.score,
                source,
                metadata: r.custom,
                explanation,
            });
        }
        Ok(out)
    }

    pub fn feedback_pin(
        &self,
        query_text: &str,
        target_file_path: &str,
        target_chunk_index: u32,
        fingerprint: Option<String>,
    ) {
        self.record_feedback(
            EventKind::Pin,
            query_text,
            target_file_path,
            target_chunk_index,
            fingerprint,
        );
    }

    pub fn feedback_unpin(
        &self,
        query_text: &str,
        target_file_path: &str,
        target_chunk_index: u32,
        fingerprint: Option<String>,
    ) {
        self.record_feedback(
            EventKind::Unpin,
            query_text,
            target_file_path,
            target_chunk_index,
            fingerprint,
        );
    }

    pub fn feedback_dismiss(
        &self,
        query_text: &str,
        target_file_path: &str,
        target_chunk_index: u32,
        fingerprint: Option<String>,
    ) {
        self.record_feedback(
            EventKind::Dismiss,
            query_text,
            target_file_path,
            target_chunk_index,
            fingerprint,
        );
    }

    pub fn feedback_click_related(
        &self,
        source_file_path: &str,
        source_chunk_index: u32,
        target_file_path: &str,
        target_chunk_index: u32,
    ) {
        let source = ChunkRef::new(source_file_path, source_chunk_index);
        let target = ChunkRef::new(target_file_path, target_chunk_index);
        self.feedback.record(FeedbackEvent {
            kind: EventKind::ClickRelated,
            source,
            target,
            timestamp: now_iso8601(),
        });
    }

    fn record_feedback(
        &self,
        kind: EventKind,
        query_text: &str,
        target_file_path: &str,
        target_chunk_index: u32,
        fingerprint: Option<String>,
    ) {
        let source = ChunkRef::for_query(query_text);
        let mut target = ChunkRef::new(target_file_path, target_chunk_index);
        target.fingerprint = fingerprint;
        self.feedback.record(FeedbackEvent {
            kind,
            source,
            target,
            timestamp: now_iso8601(),
        });
    }

    pub fn feedback_stats(&self) -> FeedbackStats {
        self.feedback.stats()
    }
}

/// Hot-swap discipline for the active database handle: exactly one swap may
/// be in flight at a time; concurrent swap requests fail fast rather than
/// queue. A swap replaces the visible `Arc<Engine>` atomically under a write
/// lock; readers that already hold a clone of the old `Arc` (e.g. an
/// in-flight request) keep running against it to completion. This is
/// transport-agnostic: whatever external surface drives database discovery
/// calls `swap` when the user switches databases.
pub struct DbManager {
    active: RwLock<Arc<Engine>>,
    swapping: AtomicBool,
}

impl DbManager {
    pub fn new(engine: Engine) -> Self {
        Self {
            active: RwLock::new(Arc::new(engine)),
            swapping: AtomicBool::new(false),
        }
    }

    /// A clone of the currently-active engine handle. Cheap: `Arc` clone under
    /// a read lock.
    pub fn handle(&self) -> Arc<Engine> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swaps in `new_engine` as the active handle. Fails fast with
    /// `RagError::Concurrency` if another swap is already in flight; never
    /// blocks waiting for one to finish. Callers are expected to have already
    /// opened `new_engine` and called `touch_recent_database` for it (/// the recent-databases record updates before the swap becomes visible).
    pub fn swap(&self, new_engine: Engine) -> Result<()> {
        if self
            .swapping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RagError::concurrency("a database swap is already in progress"));
        }
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(new_engine);
        drop(guard);
        self.swapping.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Post-retrieval filtering for `field:value` filters and `-term` exclusions.
/// Applied after feedback reranking; never re-sorts.
fn apply_query_filters(results: Vec<SearchResult>, parsed: &ParsedQuery) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| {
            for filter in &parsed.filters {
                match r.custom.get(&filter.field) {
                    Some(v) if v == &filter.value => {}
                    _ => return false,
                }
            }
            for term in &parsed.exclude_terms {
                if contains_whole_word_ci(&r.text, term) {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn contains_whole_word_ci(haystack: &str, needle: &str) -> bool {
    let needle_lower = needle.to_ascii_lowercase();
    haystack
        .to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == needle_lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::collections::BTreeMap as Map;

    /// Deterministic fake embedder: groups text by whether it mentions "Paris"
    /// vs "Rust" into two well-separated unit vectors, and a third bucket for
    /// anything else — lets orchestrator-level tests exercise ingest/search/
    /// feedback end to end without loading a real model2vec model.
    struct FakeEmbedder;

    impl EmbedBackend for FakeEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.embed_batch(std::slice::from_ref(&text.to_string()))?.remove(0))
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("Paris") || t.contains("Seine") || t.contains("Croissant") || t.contains("capital") {
                        vec![1.0, 0.0, 0.0]
                    } else if t.contains("Rust") || t.contains("keyword") || t.contains("UniqueKeyword") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }

        fn dim(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "fake-test-model"
        }
    }

    async fn test_engine(db_root: &Path, base_dir: &Path) -> Engine {
        let mut cfg = EngineConfig::default();
        cfg.base_dir = base_dir.to_path_buf();
        Engine::open(db_root, cfg, Arc::new(FakeEmbedder)).await.unwrap()
    }

    #[tokio::test]
    async fn ingest_file_then_list_files_shows_one_entry_with_matching_chunk_count() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let file = base.path().join("paris.txt");
        std::fs::write(
            &file,
            "Paris is the capital of France. The Seine runs through it. Croissants are popular.",
        )
        .unwrap();

        let summary = engine.ingest_file(&file, None).await.unwrap();
        assert_eq!(summary.chunk_count, 1);

        let files = engine.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].chunk_count, summary.chunk_count);
    }

    #[tokio::test]
    async fn query_for_capital_returns_the_paris_chunk_with_low_score() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let file = base.path().join("paris.txt");
        std::fs::write(
            &file,
            "Paris is the capital of France. The Seine runs through it. Croissants are popular.",
        )
        .unwrap();
        engine.ingest_file(&file, None).await.unwrap();

        let results = engine.query_documents("capital of France", 5, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score < 0.5);
    }

    #[tokio::test]
    async fn reingesting_a_file_replaces_its_chunks() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let file = base.path().join("doc.txt");
        std::fs::write(
            &file,
            "Rust has a strict borrow checker. Rust prevents data races at compile time.",
        )
        .unwrap();
        let first = engine.ingest_file(&file, None).await.unwrap();

        std::fs::write(
            &file,
            "Paris is the capital of France. The Seine runs through it. Croissants are popular.",
        )
        .unwrap();
        let second = engine.ingest_file(&file, None).await.unwrap();

        let chunks = engine.get_document_chunks(&second.file_path).await.unwrap();
        assert_eq!(chunks.len(), second.chunk_count);
        assert!(chunks.iter().all(|c| c.text.contains("Paris") || c.text.contains("Seine") || c.text.contains("Croissant")));
        let _ = first;
    }

    #[tokio::test]
    async fn ingest_data_html_then_delete_by_source_removes_it() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let meta = IngestDataMetadata {
            source: "https://x.test/p?q=1#h".to_string(),
            format: DataFormat::Html,
            custom: None,
        };
        engine
            .ingest_data("<html><body><h1>Hello</h1><p>World</p></body></html>", meta)
            .await
            .unwrap();

        let files = engine.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].source.as_deref(), Some("https://x.test/p"));

        engine
            .delete(DeleteTarget::Source("https://x.test/p?q=1".to_string()))
            .await
            .unwrap();
        let files = engine.list_files().await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn query_filters_exclude_terms_and_enforce_field_filters() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let mut alice_meta = Map::new();
        alice_meta.insert("author".to_string(), "alice".to_string());
        let alice_file = base.path().join("alice.txt");
        std::fs::write(
            &alice_file,
            "This UniqueKeyword document is written by alice and is not a draft at all really.",
        )
        .unwrap();
        engine.ingest_file(&alice_file, Some(alice_meta)).await.unwrap();

        let mut bob_meta = Map::new();
        bob_meta.insert("author".to_string(), "bob".to_string());
        let bob_file = base.path().join("bob.txt");
        std::fs::write(
            &bob_file,
            "This UniqueKeyword document is written by bob and mentions draft status clearly.",
        )
        .unwrap();
        engine.ingest_file(&bob_file, Some(bob_meta)).await.unwrap();

        let results = engine
            .query_documents(r#"UniqueKeyword -draft author:alice"#, 10, false)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.metadata.get("author").map(String::as_str) == Some("alice")));
        assert!(results.iter().all(|r| !r.text.to_ascii_lowercase().contains("draft")));
    }

    #[tokio::test]
    async fn pin_improves_rank_and_dismiss_worsens_it() {
        let base = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let engine = test_engine(db.path(), base.path()).await;

        let a = base.path().join("a.txt");
        std::fs::write(&a, "Rust has a strict borrow checker and keyword safety rules apply broadly.").unwrap();
        engine.ingest_file(&a, None).await.unwrap();

        let b = base.path().join("b.txt");
        std::fs::write(&b, "Rust prevents data races with its keyword ownership model entirely.").unwrap();
        engine.ingest_file(&b, None).await.unwrap();

        let before = engine.query_documents("keyword", 10, false).await.unwrap();
        let b_rank_before = before.iter().position(|r| r.file_path == b.to_string_lossy()).unwrap();

        engine.feedback_pin("keyword", &b.to_string_lossy(), 0, None);
        let after = engine.query_documents("keyword", 10, false).await.unwrap();
        let b_rank_after = after.iter().position(|r| r.file_path == b.to_string_lossy()).unwrap();

        assert!(b_rank_after <= b_rank_before);
    }

    #[test]
    fn contains_whole_word_ci_matches_case_insensitively_and_whole_word_only() {
        assert!(contains_whole_word_ci("This is a Draft document", "draft"));
        assert!(!contains_whole_word_ci("Draftsman at work", "draft"));
    }

    #[test]
    fn metadata_caps_are_enforced() {
        let mut custom = Map::new();
        custom.insert("a".repeat(101), "ok".to_string());
        assert!(validate_custom_metadata(&custom).is_err());

        let mut custom = Map::new();
        custom.insert("field".to_string(), "v".repeat(1001));
        assert!(validate_custom_metadata(&custom).is_err());

        let mut custom = Map::new();
        custom.insert("field".to_string(), "ok".to_string());
        assert!(validate_custom_metadata(&custom).is_ok());
    }

    #[tokio::test]
    async fn db_manager_swap_replaces_the_visible_handle() {
        let base = tempfile::tempdir().unwrap();
        let db_a = tempfile::tempdir().unwrap();
        let db_b = tempfile::tempdir().unwrap();

        let manager = DbManager::new(test_engine(db_a.path(), base.path()).await);
        assert_eq!(manager.handle().status().await.unwrap().document_count, 0);

        manager.swap(test_engine(db_b.path(), base.path()).await).unwrap();

        let file = base.path().join("x.txt");
        std::fs::write(&file, "Paris is the capital of France and the Seine runs through it.").unwrap();
        manager.handle().ingest_file(&file, None).await.unwrap();
        assert_eq!(manager.handle().status().await.unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn db_manager_rejects_a_concurrent_swap() {
        let base = tempfile::tempdir().unwrap();
        let db_a = tempfile::tempdir().unwrap();
        let db_b = tempfile::tempdir().unwrap();

        let manager = DbManager::new(test_engine(db_a.path(), base.path()).await);
        manager.swapping.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = manager.swap(test_engine(db_b.path(), base.path()).await).unwrap_err();
        assert!(matches!(err, RagError::Concurrency(_)));
    }
}
