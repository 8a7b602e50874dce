//! Format parsers. Each parser produces plain UTF-8 text or fails.

use crate::error::{RagError, Result};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Validates a caller-supplied path: must be absolute, its canonical form must
/// be a descendant of `base_dir`, and its size must not exceed `max_file_bytes`.
pub fn validate_path(path: &Path, base_dir: &Path, max_file_bytes: u64) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(RagError::validation("path must be absolute"));
    }
    let canonical = path
        .canonicalize()
        .map_err(|e| RagError::io(path, e))?;
    let canonical_base = base_dir
        .canonicalize()
        .map_err(|e| RagError::io(base_dir, e))?;
    if !canonical.starts_with(&canonical_base) {
        return Err(RagError::validation(
            "path must be a descendant of the configured base directory",
        ));
    }
    let metadata = std::fs::metadata(&canonical).map_err(|e| RagError::io(&canonical, e))?;
    if metadata.len() > max_file_bytes {
        return Err(RagError::validation(format!(
            "file exceeds max size of {max_file_bytes} bytes"
        )));
    }
    Ok(canonical)
}

/// Raw read for `.txt`/`.md` files.
pub fn parse_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))
}

/// Extracts raw text from a `.docx` file via `docx-rs`.
pub fn parse_docx(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| RagError::io(path, e))?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|e| RagError::parse(format!("malformed docx: {e}")))?;
    let mut out = String::new();
    for child in &docx.document.children {
        extract_docx_text(child, &mut out);
    }
    if out.trim().is_empty() {
        return Err(RagError::parse("docx contained no extractable text"));
    }
    Ok(out)
}

fn extract_docx_text(node: &docx_rs::DocumentChild, out: &mut String) {
    use docx_rs::DocumentChild;
    if let DocumentChild::Paragraph(p) = node {
        for run_child in &p.children {
            if let docx_rs::ParagraphChild::Run(run) = run_child {
                for rc in &run.children {
                    if let docx_rs::RunChild::Text(t) = rc {
                        out.push_str(&t.text);
                    }
                }
            }
        }
        out.push('\n');
    }
}

/// Converts raw HTML to Markdown with main-content extraction.
/// Fails if extraction yields empty text.
pub fn html_to_markdown(html: &str) -> Result<String> {
    let text = html2text::from_read(html.as_bytes(), 120)
        .map_err(|e| RagError::parse(format!("html conversion failed: {e}")))?;
    if text.trim().is_empty() {
        return Err(RagError::parse("html extraction produced empty text"));
    }
    Ok(text)
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("static regex")
    })
}

/// `true` if `s` "looks like code/ID": a UUID, non-letter ratio > 0.5, contains
/// `_`, or has a trailing capital+digit or leading digit+capital.
fn looks_like_code(s: &str) -> bool {
    if uuid_regex().is_match(s) {
        return true;
    }
    if s.contains('_') {
        return true;
    }
    let total = s.chars().count();
    if total == 0 {
        return true;
    }
    let non_letter = s.chars().filter(|c| !c.is_alphabetic()).count();
    if (non_letter as f32) / (total as f32) > 0.5 {
        return true;
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() >= 2 {
        let last = chars[chars.len() - 1];
        let second_last = chars[chars.len() - 2];
        if second_last.is_uppercase() && last.is_ascii_digit() {
            return true;
        }
        let first = chars[0];
        let second = chars[1];
        if first.is_ascii_digit() && second.is_uppercase() {
            return true;
        }
    }
    false
}

/// `true` if `s` "looks like prose": letter+space ratio >= 0.7.
fn looks_like_prose(s: &str) -> bool {
    let total = s.chars().count();
    if total == 0 {
        return false;
    }
    let letters_and_spaces = s
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .count();
    (letters_and_spaces as f32) / (total as f32) >= 0.7
}

const PROSE_KEY_ALLOWLIST: &[&str] = &[
    "title", "name", "heading", "caption", "summary", "scene", "chapter", "section",
    "speaker", "dialogue", "line", "text", "description", "content", "body", "message",
    "note", "comment", "label",
];

/// `true` if a leaf string value at `key_path`'s final segment should be kept
/// under the RAG filtering rule (JSON): length >= 20 and doesn't look
/// like code/ID, OR the key matches the prose allowlist and the value looks like
/// prose.
fn keep_string_leaf(last_key: &str, value: &str) -> bool {
    if value.len() >= 20 && !looks_like_code(value) {
        return true;
    }
    let key_lower = last_key.to_ascii_lowercase();
    if PROSE_KEY_ALLOWLIST.contains(&key_lower.as_str()) && looks_like_prose(value) {
        return true;
    }
    false
}

/// Returns the JSON object key that directly encloses the leaf at `prefix`,
/// stripping any trailing `[i]` array-index segments first (so `"tags[0]"` and
/// `"chapters[0].scenes[0]"` resolve to `"tags"` and `"scenes"`, not `"tags[0"`
/// or `"scenes[0"`).
fn last_key_of(prefix: &str) -> &str {
    let mut s = prefix;
    while let Some(bracket) = s.rfind('[') {
        if s[bracket..].ends_with(']') {
            s = &s[..bracket];
        } else {
            break;
        }
    }
    match s.rfind('.') {
        Some(i) => &s[i + 1..],
        None => s,
    }
}

/// Walks a parsed JSON value, emitting one `prefix: value` line per kept leaf.
/// Object keys join with `.`, array elements append `[i]`.
fn walk_json(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let next = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                walk_json(v, &next, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let next = format!("{prefix}[{i}]");
                walk_json(v, &next, out);
            }
        }
        Value::String(s) => {
            let last_key = last_key_of(prefix);
            if keep_string_leaf(last_key, s) {
                out.push(format!("{prefix}: {s}"));
            }
        }
        // Numbers, booleans, null, empty arrays/objects are dropped.
        _ => {}
    }
}

const JSON_RAW_CAP_BYTES: usize = 10 * 1024 * 1024;

/// Parses JSON; on syntax failure falls back to JSONL (one object per
/// non-blank line, malformed lines skipped). Caps raw content at 10 MiB.
/// Converts to the filtered `prefix: value` representation.
pub fn parse_json(raw: &str) -> Result<String> {
    if raw.len() > JSON_RAW_CAP_BYTES {
        return Err(RagError::validation("json content exceeds 10 MiB cap"));
    }
    let mut lines = Vec::new();
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => walk_json(&value, "", &mut lines),
        Err(_) => {
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => walk_json(&value, "", &mut lines),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed JSONL line");
                        continue;
                    }
                }
            }
        }
    }
    if lines.is_empty() {
        return Err(RagError::parse("json/jsonl produced no prose content"));
    }
    Ok(lines.join("\n"))
}
