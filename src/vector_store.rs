//! Vector store: persistent chunk storage, hybrid vector+BM25 search, FTS index
//! lifecycle, grouping, and related-chunk lookup.
//!
//! `metadata.custom` is stored as a single opaque JSON string column rather than
//! one column per key, so chunks introducing new custom keys never trigger a
//! schema mismatch on insert.

use crate::config::{GroupingMode, VectorStoreConfig};
use crate::error::{RagError, Result};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::index::scalar::FtsIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const TABLE_NAME: &str = "chunks";

/// A chunk as persisted in the vector store ("Chunk").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub custom: BTreeMap<String, String>,
    pub timestamp: String,
}

/// A search result: the chunk plus its fused score (lower is better).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub chunk_index: u32,
    pub text: String,
    pub score: f32,
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    VectorOnly,
}

#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub document_count: usize,
    pub chunk_count: usize,
    pub memory_usage_bytes: usize,
    pub uptime_secs: u64,
    pub fts_index_enabled: bool,
    pub search_mode: SearchMode,
}

fn xxh3_id(file_path: &str, chunk_index: u32) -> String {
    let hash = xxhash_rust::xxh3::xxh3_128(format!("{file_path}#{chunk_index}").as_bytes());
    format!("{hash:032x}")
}

/// Deterministic 128-bit chunk id from `(file_path, chunk_index)`, used as the
/// unique primary key for a chunk row.
pub fn chunk_id(file_path: &str, chunk_index: u32) -> String {
    xxh3_id(file_path, chunk_index)
}

fn schema(dim: i32) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, false)), dim),
            false,
        ),
        Field::new("file_name", DataType::Utf8, false),
        Field::new("file_size", DataType::UInt64, false),
        Field::new("file_type", DataType::Utf8, false),
        Field::new("custom_json", DataType::Utf8, false),
        Field::new("timestamp", DataType::Utf8, false),
    ])
}

fn chunks_to_batch(chunks: &[Chunk]) -> Result<Box<dyn arrow_array::RecordBatchReader + Send>> {
    let dim = chunks
        .first()
        .map(|c| c.embedding.len())
        .ok_or_else(|| RagError::storage("cannot build a batch from zero chunks"))?;

    let mut flat = Vec::with_capacity(chunks.len() * dim);
    for c in chunks {
        if c.embedding.len() != dim {
            return Err(RagError::storage("embedding dimension mismatch within batch"));
        }
        flat.extend_from_slice(&c.embedding);
    }

    let schema = Arc::new(schema(dim as i32));

    let id_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str())));
    let path_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.file_path.as_str())));
    let idx_arr: ArrayRef = Arc::new(UInt32Array::from_iter_values(chunks.iter().map(|c| c.chunk_index)));
    let text_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str())));
    let values: ArrayRef = Arc::new(Float32Array::from(flat));
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_arr: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(item_field, dim as i32, values, None)
            .map_err(|e| RagError::storage(e.to_string()))?,
    );
    let name_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.file_name.as_str())));
    let size_arr: ArrayRef = Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.file_size)));
    let type_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.file_type.as_str())));
    let custom_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| {
        serde_json::to_string(&c.custom).unwrap_or_else(|_| "{}".to_string())
    })));
    let ts_arr: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.timestamp.as_str())));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            id_arr, path_arr, idx_arr, text_arr, vector_arr, name_arr, size_arr, type_arr,
            custom_arr, ts_arr,
        ],
    )
    .map_err(|e| RagError::storage(e.to_string()))?;

    Ok(Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema)))
}

fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// FTS index config for `text`: an n-gram tokenizer rather than the default
/// whitespace-based one, so CJK text (which has no whitespace word
/// boundaries) still gets indexed.
fn fts_index_builder() -> FtsIndexBuilder {
    FtsIndexBuilder::default()
        .base_tokenizer("ngram".to_string())
        .ngram_min_length(2)
        .ngram_max_length(3)
        .prefix_only(false)
}

/// Hybrid vector + BM25 chunk store backed by a single LanceDB table.
pub struct VectorStore {
    db_dir: PathBuf,
    cfg: VectorStoreConfig,
    fts_enabled: AtomicBool,
    started_at: Instant,
}

impl VectorStore {
    /// Opens the store at `db_dir`. If a table already exists on disk, probes
    /// (and if necessary rebuilds) its full-text index immediately, so a
    /// restarted process reports `search_mode: hybrid` right away rather than
    /// only after the next ingest.
    pub async fn open(db_dir: &Path, cfg: VectorStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(db_dir).map_err(|e| RagError::io(db_dir, e))?;
        let store = Self {
            db_dir: db_dir.to_path_buf(),
            cfg,
            fts_enabled: AtomicBool::new(false),
            started_at: Instant::now(),
        };
        if let Some(table) = store.open_table().await? {
            store.ensure_fts_index(&table).await;
        }
        Ok(store)
    }

    pub fn hybrid_weight(&self) -> f32 {
        self.cfg.hybrid_weight
    }

    pub fn set_hybrid_weight(&mut self, w: f32) {
        self.cfg.hybrid_weight = w.clamp(0.0, 1.0);
    }

    async fn connect(&self) -> Result<lancedb::Connection> {
        lancedb::connect(self.db_dir.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))
    }

    async fn open_table(&self) -> Result<Option<lancedb::Table>> {
        let db = self.connect().await?;
        let names = db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            return Ok(None);
        }
        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;
        Ok(Some(table))
    }

    /// Ensures a full-text index exists on `text`, reusing one already built on
    /// disk rather than rebuilding it on every `open`. Creation failures are
    /// non-fatal: the store degrades to vector-only search and advertises that
    /// in `status`.
    async fn ensure_fts_index(&self, table: &lancedb::Table) {
        match table.list_indices().await {
            Ok(indices) => {
                if indices.iter().any(|idx| idx.columns.iter().any(|c| c == "text")) {
                    self.fts_enabled.store(true, Ordering::Relaxed);
                    return;
                }
            }
            Err(e) => warn!(error = %e, "failed to list existing indices; attempting to build fts index"),
        }

        match table
            .create_index(&["text"], Index::FTS(fts_index_builder()))
            .execute()
            .await
        {
            Ok(()) => {
                self.fts_enabled.store(true, Ordering::Relaxed);
                info!("full-text index ready");
            }
            Err(e) => {
                self.fts_enabled.store(false, Ordering::Relaxed);
                warn!(error = %e, "full-text index creation failed; falling back to vector-only search");
            }
        }
    }

    /// Inserts `chunks` for `file_path`, deleting any prior chunks for that path
    /// first (delete-of-old happens-before insert-of-new within a
    /// single call). Callers are responsible for per-file-path serialization
    /// (the orchestrator's mutex map).
    pub async fn replace_file_chunks(&self, file_path: &str, chunks: &[Chunk]) -> Result<()> {
        let db = self.connect().await?;
        let escaped = escape_sql_literal(file_path);
        let predicate = format!("file_path = '{escaped}'");

        let table = match db.open_table(TABLE_NAME).execute().await {
            Ok(t) => Some(t),
            Err(_) if chunks.is_empty() => None,
            Err(_) => {
                let batches = chunks_to_batch(chunks)?;
                let table = db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .map_err(|e| RagError::storage(e.to_string()))?;
                self.ensure_fts_index(&table).await;
                return Ok(());
            }
        };

        let Some(table) = table else {
            return Ok(());
        };

        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;

        if !chunks.is_empty() {
            let batches = chunks_to_batch(chunks)?;
            table
                .add(batches)
                .execute()
                .await
                .map_err(|e| RagError::storage(e.to_string()))?;
        }

        if !self.fts_enabled.load(Ordering::Relaxed) {
            self.ensure_fts_index(&table).await;
        }

        Ok(())
    }

    /// Deletes all chunks for `file_path` (idempotent: absence is not an error).
    pub async fn delete_file(&self, file_path: &str) -> Result<()> {
        let Some(table) = self.open_table().await? else {
            return Ok(());
        };
        let escaped = escape_sql_literal(file_path);
        table
            .delete(&format!("file_path = '{escaped}'"))
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;
        Ok(())
    }

    /// Hybrid search contract: vector-only when `query_text` is
    /// empty, otherwise combines a vector k-NN and a BM25 lookup via the score
    /// fusion formula `final = (1-w)*vec_dist + w*(1-bm25_normalized)`.
    pub async fn search(
        &self,
        query_vec: &[f32],
        query_text: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let fetch = (limit.max(1) * 4).min(1000);
        let vector_hits = self.vector_candidates(&table, query_vec, fetch).await?;

        let use_bm25 = query_text.map(|q| !q.trim().is_empty()).unwrap_or(false)
            && self.fts_enabled.load(Ordering::Relaxed);

        let mut results = if use_bm25 {
            let bm25_hits = self
                .bm25_candidates(&table, query_text.unwrap(), fetch)
                .await
                .unwrap_or_default();
            fuse_scores(vector_hits, bm25_hits, self.cfg.hybrid_weight)
        } else {
            vector_hits
        };

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(floor) = self.cfg.max_distance {
            results.retain(|(_, score)| *score <= floor);
        }

        let mut out: Vec<SearchResult> = results
            .into_iter()
            .take(fetch)
            .map(|(row, score)| row.into_result(score))
            .collect();

        out = apply_grouping(out, self.cfg.grouping_mode);
        out.truncate(limit);
        Ok(out)
    }

    async fn vector_candidates(
        &self,
        table: &lancedb::Table,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<(Row, f32)>> {
        let mut stream = table
            .vector_search(query_vec.to_vec())
            .map_err(|e| RagError::storage(e.to_string()))?
            .distance_type(lancedb::DistanceType::Dot)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?
        {
            out.extend(rows_from_batch_with_distance(&batch, "_distance")?);
        }
        Ok(out)
    }

    async fn bm25_candidates(
        &self,
        table: &lancedb::Table,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<(Row, f32)>> {
        let mut stream = table
            .query()
            .full_text_search(lancedb::query::FullTextSearchQuery::new(query_text.to_string()))
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?
        {
            out.extend(rows_from_batch_with_distance(&batch, "_score")?);
        }
        Ok(out)
    }

    /// `find_related(file_path, chunk_index, ...)`: fetches the anchor chunk's
    /// vector, runs k-NN, drops the anchor and (optionally) same-document rows.
    pub async fn find_related(
        &self,
        file_path: &str,
        chunk_index: u32,
        limit: usize,
        exclude_same_doc: bool,
    ) -> Result<Vec<SearchResult>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };
        let anchor = self.get_chunk_row(&table, file_path, chunk_index).await?;
        let Some(anchor) = anchor else {
            return Ok(vec![]);
        };

        let fetch = (limit.max(1) * 4 + 1).min(1000);
        let hits = self.vector_candidates(&table, &anchor.embedding, fetch).await?;

        let mut out = Vec::new();
        for (row, score) in hits {
            if row.file_path == file_path && row.chunk_index == chunk_index {
                continue;
            }
            if exclude_same_doc && row.file_path == file_path {
                continue;
            }
            out.push(row.into_result(score));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn get_chunk_row(
        &self,
        table: &lancedb::Table,
        file_path: &str,
        chunk_index: u32,
    ) -> Result<Option<Row>> {
        let escaped = escape_sql_literal(file_path);
        let predicate = format!("file_path = '{escaped}' AND chunk_index = {chunk_index}");
        let mut stream = table
            .query()
            .only_if(predicate)
            .limit(1)
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?
        {
            let rows = rows_from_batch(&batch)?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// `get_document_chunks(file_path)`: all chunks for a file, ordered by
    /// `chunk_index`.
    pub async fn get_document_chunks(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };
        let escaped = escape_sql_literal(file_path);
        let mut stream = table
            .query()
            .only_if(format!("file_path = '{escaped}'"))
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;

        let mut rows = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?
        {
            rows.extend(rows_from_batch(&batch)?);
        }
        rows.sort_by_key(|r| r.chunk_index);
        Ok(rows.into_iter().map(Row::into_chunk).collect())
    }

    /// Lists distinct files with their chunk counts.
    pub async fn list_files(&self) -> Result<Vec<(String, usize)>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };
        let mut stream = table
            .query()
            .execute()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::storage(e.to_string()))?
        {
            for row in rows_from_batch(&batch)? {
                *counts.entry(row.file_path).or_insert(0) += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        let files = self.list_files().await?;
        let chunk_count = files.iter().map(|(_, n)| n).sum();
        let search_mode = if self.fts_enabled.load(Ordering::Relaxed) {
            SearchMode::Hybrid
        } else {
            SearchMode::VectorOnly
        };
        Ok(StoreStatus {
            document_count: files.len(),
            chunk_count,
            memory_usage_bytes: chunk_count * 1536,
            uptime_secs: self.started_at.elapsed().as_secs(),
            fts_index_enabled: self.fts_enabled.load(Ordering::Relaxed),
            search_mode,
        })
    }
}

/// A decoded row, cheap to carry around before it's turned into a public
/// `SearchResult` or `Chunk`.
struct Row {
    file_path: String,
    chunk_index: u32,
    text: String,
    embedding: Vec<f32>,
    file_name: String,
    file_size: u64,
    file_type: String,
    custom: BTreeMap<String, String>,
    timestamp: String,
}

impl Row {
    fn into_result(self, score: f32) -> SearchResult {
        SearchResult {
            file_path: self.file_path,
            chunk_index: self.chunk_index,
            text: self.text,
            score,
            custom: self.custom,
        }
    }

    fn into_chunk(self) -> Chunk {
        let id = xxh3_id(&self.file_path, self.chunk_index);
        Chunk {
            id,
            file_path: self.file_path,
            chunk_index: self.chunk_index,
            text: self.text,
            embedding: self.embedding,
            file_name: self.file_name,
            file_size: self.file_size,
            file_type: self.file_type,
            custom: self.custom,
            timestamp: self.timestamp,
        }
    }
}

fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<Row>> {
    rows_from_batch_with_distance(batch, "").map(|v| v.into_iter().map(|(r, _)| r).collect())
}

fn rows_from_batch_with_distance(batch: &RecordBatch, distance_col: &str) -> Result<Vec<(Row, f32)>> {
    let col = |name: &str| -> Result<&ArrayRef> {
        batch
            .column_by_name(name)
            .ok_or_else(|| RagError::storage(format!("missing column {name}")))
    };
    let paths = col("file_path")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("file_path column has wrong type"))?;
    let indices = col("chunk_index")?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::storage("chunk_index column has wrong type"))?;
    let texts = col("text")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("text column has wrong type"))?;
    let names = col("file_name")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("file_name column has wrong type"))?;
    let sizes = col("file_size")?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| RagError::storage("file_size column has wrong type"))?;
    let types = col("file_type")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("file_type column has wrong type"))?;
    let customs = col("custom_json")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("custom_json column has wrong type"))?;
    let timestamps = col("timestamp")?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::storage("timestamp column has wrong type"))?;
    let vectors = col("vector")?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| RagError::storage("vector column has wrong type"))?;

    let distances: Option<&Float32Array> = if distance_col.is_empty() {
        None
    } else {
        batch
            .column_by_name(distance_col)
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
    };

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let embedding_values = vectors.value(i);
        let float_values = embedding_values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::storage("vector item type mismatch"))?;
        let embedding = (0..float_values.len()).map(|j| float_values.value(j)).collect();

        let custom: BTreeMap<String, String> =
            serde_json::from_str(customs.value(i)).unwrap_or_default();

        let row = Row {
            file_path: paths.value(i).to_string(),
            chunk_index: indices.value(i),
            text: texts.value(i).to_string(),
            embedding,
            file_name: names.value(i).to_string(),
            file_size: sizes.value(i),
            file_type: types.value(i).to_string(),
            custom,
            timestamp: timestamps.value(i).to_string(),
        };
        let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
        out.push((row, distance));
    }
    Ok(out)
}

/// Fuses vector-distance and BM25 scores for a set of vector candidates and a
/// set of BM25 candidates keyed by `(file_path, chunk_index)`. Rows present
/// only in the vector set get `bm25_normalized = 0.0`.
fn fuse_scores(
    vector_hits: Vec<(Row, f32)>,
    bm25_hits: Vec<(Row, f32)>,
    w: f32,
) -> Vec<(Row, f32)> {
    use std::collections::HashMap;

    let bm25_raw: HashMap<(String, u32), f32> = bm25_hits
        .iter()
        .map(|(row, score)| ((row.file_path.clone(), row.chunk_index), *score))
        .collect();

    let (min_bm25, max_bm25) = bm25_raw
        .values()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(mn, mx), &v| {
            (mn.min(v), mx.max(v))
        });
    let range = (max_bm25 - min_bm25).max(f32::EPSILON);

    vector_hits
        .into_iter()
        .map(|(row, vec_dist)| {
            let key = (row.file_path.clone(), row.chunk_index);
            let bm25_normalized = match bm25_raw.get(&key) {
                Some(&raw) if max_bm25.is_finite() => (raw - min_bm25) / range,
                _ => 0.0,
            };
            let fused = (1.0 - w) * vec_dist + w * (1.0 - bm25_normalized);
            (row, fused)
        })
        .collect()
}

/// Post-retrieval statistical cutoff ("Grouping mode"). Computes
/// consecutive-rank score gaps, treats any gap exceeding `mean + 1.5*stddev` as a
/// boundary, and trims the tail accordingly. A single global stddev over all
/// gaps means two boundaries of very different magnitude aren't both
/// guaranteed to cross the threshold; this matches the formula as specified.
fn apply_grouping(results: Vec<SearchResult>, mode: GroupingMode) -> Vec<SearchResult> {
    if mode == GroupingMode::Off || results.len() <= 1 {
        return results;
    }

    let gaps: Vec<f32> = results
        .windows(2)
        .map(|w| w[1].score - w[0].score)
        .collect();
    let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f32>() / gaps.len() as f32;
    let stddev = variance.sqrt();
    let threshold = mean + 1.5 * stddev;

    let boundaries: Vec<usize> = gaps
        .iter()
        .enumerate()
        .filter(|(_, &g)| g > threshold)
        .map(|(i, _)| i + 1)
        .collect();

    if boundaries.is_empty() {
        return results;
    }

    let cut = match mode {
        GroupingMode::Similar => boundaries[0],
        GroupingMode::Related => boundaries.get(1).copied().unwrap_or(results.len()),
        GroupingMode::Off => unreachable!(),
    };

    results.into_iter().take(cut).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f32) -> SearchResult {
        SearchResult {
            file_path: "f".to_string(),
            chunk_index: 0,
            text: "t".to_string(),
            score,
            custom: BTreeMap::new(),
        }
    }

    fn make_row(path: &str, idx: u32) -> Row {
        Row {
            file_path: path.to_string(),
            chunk_index: idx,
            text: String::new(),
            embedding: vec![],
            file_name: String::new(),
            file_size: 0,
            file_type: String::new(),
            custom: BTreeMap::new(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn chunk_id_is_deterministic_and_unique_per_pair() {
        let a = chunk_id("/a.txt", 0);
        let b = chunk_id("/a.txt", 0);
        let c = chunk_id("/a.txt", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn grouping_single_result_passes_through() {
        let results = vec![result(0.1)];
        assert_eq!(apply_grouping(results.clone(), GroupingMode::Similar).len(), 1);
        assert_eq!(apply_grouping(results, GroupingMode::Related).len(), 1);
    }

    #[test]
    fn grouping_uniform_scores_returns_everything() {
        let results: Vec<_> = (0..5).map(|_| result(0.5)).collect();
        let out = apply_grouping(results.clone(), GroupingMode::Similar);
        assert_eq!(out.len(), results.len());
    }

    #[test]
    fn grouping_bimodal_distribution_cuts_at_first_and_second_boundary() {
        // Both mode-boundary gaps are the same size (1.00) so neither one's
        // stddev contribution can drown out the other; the five within-cluster
        // gaps stay tiny (0.01) by comparison.
        let scores = vec![0.10, 0.11, 0.12, 1.12, 1.13, 1.14, 2.14, 2.15];
        let results: Vec<_> = scores.into_iter().map(result).collect();
        let similar = apply_grouping(results.clone(), GroupingMode::Similar);
        let related = apply_grouping(results, GroupingMode::Related);
        assert_eq!(similar.len(), 3);
        assert_eq!(related.len(), 6);
    }

    #[test]
    fn grouping_off_returns_everything_unchanged() {
        let results: Vec<_> = vec![0.1, 0.9, 1.9].into_iter().map(result).collect();
        let out = apply_grouping(results.clone(), GroupingMode::Off);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn fuse_scores_weight_zero_is_vector_only() {
        let rows = vec![(make_row("a", 0), 0.1_f32), (make_row("b", 0), 0.5_f32)];
        let fused = fuse_scores(rows, vec![], 0.0);
        assert!((fused[0].1 - 0.1).abs() < 1e-6);
        assert!((fused[1].1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fuse_scores_unmatched_bm25_row_gets_zero_contribution() {
        let vec_hits = vec![(make_row("a", 0), 0.2_f32)];
        let bm25_hits = vec![(make_row("b", 0), 5.0_f32)];
        let fused = fuse_scores(vec_hits, bm25_hits, 0.6);
        assert!((fused[0].1 - (0.4 * 0.2 + 0.6)).abs() < 1e-5);
    }
}


