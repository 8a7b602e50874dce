//! PDF parsing and boundary filter.
//!
//! Extracts positioned text per page with `oxidize-pdf`, segments each page into
//! sentences, then drops sentences that recur across pages near the top or
//! bottom — headers, footers, and running page numbers. Exact-string matching
//! fails here because footers like "7 of 75" vary per page; embedding similarity
//! generalizes while still rejecting unrelated prose.

use crate::config::PdfBoundaryConfig;
use crate::embedder::cosine_similarity;
use crate::error::{RagError, Result};
use crate::sentence::split_sentences;
use oxidize_pdf::parser::PdfReader;
use oxidize_pdf::text::TextExtractor;
use std::path::Path;

/// A positioned sentence. The owning page is implicit in its position within
/// the outer `Vec<Vec<PageSentence>>`.
struct PageSentence {
    text: String,
    /// Whether this sentence is drawn from the top/bottom edge of its page.
    edge: Edge,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Edge {
    Top,
    Bottom,
    Middle,
}

/// Parses the PDF at `path`, returning plain text with header/footer material
/// removed per the boundary filter algorithm.
pub fn parse_pdf<F>(path: &Path, cfg: &PdfBoundaryConfig, embed_batch: F) -> Result<String>
where
    F: FnOnce(&[String]) -> Result<Vec<Vec<f32>>>,
{
    let document = PdfReader::open_document(path)
        .map_err(|e| RagError::parse(format!("malformed pdf: {e}")))?;
    let mut extractor = TextExtractor::new();
    let pages = extractor
        .extract_from_document(&document)
        .map_err(|e| RagError::parse(format!("malformed pdf: {e}")))?;

    if pages.is_empty() {
        return Ok(String::new());
    }

    // Segment each page into sentences and mark edge membership (first/last K).
    let mut page_sentences: Vec<Vec<PageSentence>> = Vec::with_capacity(pages.len());
    for (page_idx, page) in pages.iter().enumerate() {
        let sentences = split_sentences(&page.text);
        let k = cfg.edge_sentences;
        let n = sentences.len();
        let marked = sentences
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let edge = if i < k {
                    Edge::Top
                } else if n > 0 && i >= n.saturating_sub(k) {
                    Edge::Bottom
                } else {
                    Edge::Middle
                };
                PageSentence { text, edge }
            })
            .collect();
        page_sentences.push(marked);
    }

    // Only edge sentences are candidates for removal.
    let mut candidates: Vec<(usize, usize)> = Vec::new(); // (page_index, sentence_index_within_page)
    for (page_idx, sentences) in page_sentences.iter().enumerate() {
        for (i, s) in sentences.iter().enumerate() {
            if s.edge != Edge::Middle {
                candidates.push((page_idx, i));
            }
        }
    }

    if candidates.is_empty() {
        return Ok(join_reading_order(&page_sentences, &Default::default()));
    }

    let texts: Vec<String> = candidates
        .iter()
        .map(|&(p, i)| page_sentences[p][i].text.clone())
        .collect();
    let embeddings = embed_batch(&texts)?;

    let num_pages = pages.len();
    let repeat_threshold = ((num_pages + 2) / 3).max(cfg.min_repeat_floor);

    let mut drop: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
    for (ci, &(page_i, _)) in candidates.iter().enumerate() {
        let mut pages_with_match: std::collections::HashSet<usize> = std::collections::HashSet::new();
        for (cj, &(page_j, _)) in candidates.iter().enumerate() {
            if page_j == page_i {
                continue;
            }
            let sim = cosine_similarity(&embeddings[ci], &embeddings[cj]);
            if sim > cfg.similarity_threshold {
                pages_with_match.insert(page_j);
            }
        }
        if pages_with_match.len() >= repeat_threshold {
            drop.insert(candidates[ci]);
        }
    }

    Ok(join_reading_order(&page_sentences, &drop))
}

fn join_reading_order(
    page_sentences: &[Vec<PageSentence>],
    drop: &std::collections::HashSet<(usize, usize)>,
) -> String {
    let mut out = String::new();
    for (page_idx, sentences) in page_sentences.iter().enumerate() {
        for (i, s) in sentences.iter().enumerate() {
            if drop.contains(&(page_idx, i)) {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&s.text);
        }
    }
    out
}
