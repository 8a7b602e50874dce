//! Content-addressed raw-data store.
//!
//! Raw-data entries back content ingested via `ingest_data` rather than read from
//! a user-visible file. The path is a pure function of the normalized source, so
//! it never collides and is always reconstructible by the orchestrator's delete
//! path.

use crate::error::{RagError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Source URL schemes ingest_data rejects outright.
const DISALLOWED_SCHEMES: &[&str] = &["javascript:", "data:"];

/// Strips the query string and fragment from an HTTP(S) URL; passes other
/// schemes through unchanged.
pub fn normalize_source(source: &str) -> String {
    if let Some(rest) = source
        .strip_prefix("http://")
        .or_else(|| source.strip_prefix("https://"))
    {
        let scheme_len = source.len() - rest.len();
        let end = rest
            .find(['?', '#'])
            .map(|i| i + scheme_len)
            .unwrap_or(source.len());
        source[..end].to_string()
    } else {
        source.to_string()
    }
}

/// Rejects disallowed schemes: `javascript:`, `data:`, and `file:` URIs containing
/// path traversal (`..`).
pub fn validate_source_scheme(source: &str) -> Result<()> {
    let lower = source.to_ascii_lowercase();
    for scheme in DISALLOWED_SCHEMES {
        if lower.starts_with(scheme) {
            return Err(RagError::validation(format!(
                "source scheme not allowed: {scheme}"
            )));
        }
    }
    if lower.starts_with("file:") && source.contains("..") {
        return Err(RagError::validation(
            "file: source with path traversal is not allowed",
        ));
    }
    Ok(())
}

/// Computes the deterministic raw-data path for `source` under `db_root`. The
/// extension is always `.md`: downstream ingestion always treats raw-data
/// content as markdown, and the path must be reconstructible from the source
/// alone (needed by delete-by-source).
pub fn raw_data_path(db_root: &Path, source: &str) -> PathBuf {
    let normalized = normalize_source(source);
    let encoded = URL_SAFE_NO_PAD.encode(normalized.as_bytes());
    db_root.join("raw-data").join(format!("{encoded}.md"))
}

/// `true` if `path` lives under `{db_root}/raw-data/` and ends in `.md`.
pub fn is_raw_path(db_root: &Path, path: &Path) -> bool {
    let raw_dir = db_root.join("raw-data");
    path.starts_with(&raw_dir) && path.extension().is_some_and(|e| e == "md")
}

/// Recovers the original (normalized) source string encoded in a raw-data path's
/// basename, if `path` is a well-formed raw-data path.
pub fn extract_source(db_root: &Path, path: &Path) -> Option<String> {
    if !is_raw_path(db_root, path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let decoded = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(decoded).ok()
}

/// Writes `content` for `source`, creating `{db_root}/raw-data/` on first write
/// and performing an atomic write-temp-then-rename. Returns the resulting path.
pub fn save(db_root: &Path, source: &str, content: &str) -> Result<PathBuf> {
    validate_source_scheme(source)?;
    let path = raw_data_path(db_root, source);
    let dir = path
        .parent()
        .expect("raw_data_path always has a raw-data/ parent");
    std::fs::create_dir_all(dir).map_err(|e| RagError::io(dir, e))?;

    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().unwrap().to_string_lossy()
    ));
    std::fs::write(&tmp, content).map_err(|e| RagError::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| RagError::io(&path, e))?;
    Ok(path)
}

/// Deletes the raw-data file at `path`. Tolerates `NotFound` (idempotent delete).
pub fn delete(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RagError::io(path, e)),
    }
}
