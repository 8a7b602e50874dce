use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard safety ceiling: files larger than this are **always** skipped, regardless
/// of config. Protects low-RAM machines against an oversized upload.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024; // 100 MiB default cap

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// HuggingFace model repo ID used by model2vec-rs.
    pub model: String,
    /// Directory model weights are cached in.
    pub cache_dir: Option<PathBuf>,
    /// Max texts per `embed_batch` call.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "minishlab/potion-retrieval-32M".to_string(),
            cache_dir: None,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub hard_threshold: f32,
    pub c: f32,
    pub window: usize,
    pub init_const: f32,
    pub min_chunk_length: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            hard_threshold: 0.6,
            c: 0.9,
            window: 5,
            init_const: 1.5,
            min_chunk_length: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfBoundaryConfig {
    /// How many sentences to sample from the top and bottom of each page.
    pub edge_sentences: usize,
    /// Cosine similarity above which two sentences are considered the same repeated item.
    pub similarity_threshold: f32,
    /// Absolute floor on the repeat count, in addition to the `pages/3` ratio.
    pub min_repeat_floor: usize,
}

impl Default for PdfBoundaryConfig {
    fn default() -> Self {
        Self {
            edge_sentences: 3,
            similarity_threshold: 0.85,
            min_repeat_floor: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    Off,
    Similar,
    Related,
}

impl Default for GroupingMode {
    fn default() -> Self {
        Self::Off
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Weight of the BM25 contribution in hybrid score fusion, in [0, 1].
    pub hybrid_weight: f32,
    /// Optional floor: results whose fused distance exceeds this are dropped.
    pub max_distance: Option<f32>,
    pub grouping_mode: GroupingMode,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: 0.6,
            max_distance: None,
            grouping_mode: GroupingMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Rerank adjustment strength; larger moves pinned/dismissed pairs further.
    pub alpha: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { alpha: 0.1 }
    }
}

/// Top-level engine configuration. Loaded from `${dbRoot}/ragdb.json`, falling back
/// silently to defaults when the file is absent or fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory that parsers will validate file paths against (allow-root).
    pub base_dir: PathBuf,
    pub max_file_bytes: u64,
    pub embedding: EmbeddingConfig,
    pub chunker: ChunkerConfig,
    pub pdf_boundary: PdfBoundaryConfig,
    pub vector_store: VectorStoreConfig,
    pub feedback: FeedbackConfig,
    /// Absolute paths scanned when discovering candidate databases.
    pub allowed_scan_roots: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            max_file_bytes: 100 * 1024 * 1024,
            embedding: EmbeddingConfig::default(),
            chunker: ChunkerConfig::default(),
            pdf_boundary: PdfBoundaryConfig::default(),
            vector_store: VectorStoreConfig::default(),
            feedback: FeedbackConfig::default(),
            allowed_scan_roots: vec![],
        }
    }
}

/// Loads `{db_root}/ragdb.json`, falling back to defaults on any I/O or parse
/// failure — an invalid or missing config must never prevent the engine from
/// starting.
pub fn load_config(db_root: &Path) -> EngineConfig {
    let path = db_root.join("ragdb.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return EngineConfig::default();
    };
    serde_json::from_str::<EngineConfig>(&text).unwrap_or_else(|_| EngineConfig::default())
}

/// Record of a previously-opened database, persisted outside `dbRoot` in a
/// user-config directory ("recent-databases").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDatabase {
    pub path: PathBuf,
    pub name: String,
    pub last_accessed: String,
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDatabases {
    pub version: u32,
    pub databases: Vec<RecentDatabase>,
}

impl Default for RecentDatabases {
    fn default() -> Self {
        Self {
            version: 1,
            databases: vec![],
        }
    }
}

/// Returns the path to the user-config `recent-databases.json` file.
pub fn recent_databases_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ragdb").join("recent-databases.json"))
}

/// Reads the recent-databases record; an invalid or missing file is treated as
/// empty ("validated on read; invalid files are treated as empty and
/// overwritten").
pub fn load_recent_databases() -> RecentDatabases {
    let Some(path) = recent_databases_path() else {
        return RecentDatabases::default();
    };
    let Ok(text) = std::fs::read_to_string(&path) else {
        return RecentDatabases::default();
    };
    serde_json::from_str(&text).unwrap_or_default()
}

pub fn save_recent_databases(data: &RecentDatabases) -> crate::error::Result<()> {
    let Some(path) = recent_databases_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| crate::error::RagError::io(parent, e))?;
    }
    let text = serde_json::to_vec_pretty(data)
        .map_err(|e| crate::error::RagError::storage(e.to_string()))?;
    std::fs::write(&path, text).map_err(|e| crate::error::RagError::io(&path, e))
}
