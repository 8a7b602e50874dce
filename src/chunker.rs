//! Semantic chunker: Max-Min boundary detection over sentence embeddings.
//!
//! The admission rule compares the similarity of a candidate sentence to the
//! current chunk (`max_sim`) against a dynamic threshold derived from the
//! chunk's recent internal cohesion (`min_sim`). The minimum is taken over only
//! the last `window` sentence pairs rather than the full chunk, which is a
//! deliberate O(1)-per-step approximation of the paper's full-chunk minimum —
//! see `min_sim_full` below, kept around purely so the windowed approximation
//! can be unit-tested against it on small inputs.

use crate::config::ChunkerConfig;
use crate::embedder::cosine_similarity;
use crate::sentence::split_sentences;

/// A single chunk produced by the chunker, before it is embedded and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Windowed Max-Min chunker state machine, run sentence-by-sentence.
struct MaxMinWalk<'a> {
    cfg: &'a ChunkerConfig,
    sentences: &'a [String],
    embeddings: &'a [Vec<f32>],
}

impl<'a> MaxMinWalk<'a> {
    /// Minimum cosine similarity over the last `window` consecutive sentence
    /// pairs within `current` (indices into `sentences`/`embeddings`). Returns
    /// `init_const` when `current` has fewer than 2 sentences, seeding the very
    /// first admission decision.
    fn windowed_min_sim(&self, current: &[usize]) -> f32 {
        if current.len() < 2 {
            return self.cfg.init_const;
        }
        let window = self.cfg.window.max(1);
        let start = current.len().saturating_sub(window + 1);
        let pairs = &current[start..];
        pairs
            .windows(2)
            .map(|w| cosine_similarity(&self.embeddings[w[0]], &self.embeddings[w[1]]))
            .fold(f32::INFINITY, f32::min)
    }

    /// Full-chunk minimum pairwise similarity, O(n^2) per step. Reference
    /// implementation for the windowed approximation's unit test — not used on
    /// the hot path.
    #[cfg(test)]
    fn full_min_sim(&self, current: &[usize]) -> f32 {
        if current.len() < 2 {
            return self.cfg.init_const;
        }
        let mut min = f32::INFINITY;
        for i in 0..current.len() {
            for j in (i + 1)..current.len() {
                let sim = cosine_similarity(&self.embeddings[current[i]], &self.embeddings[current[j]]);
                min = min.min(sim);
            }
        }
        min
    }

    fn max_sim(&self, current: &[usize], candidate: usize) -> f32 {
        current
            .iter()
            .map(|&i| cosine_similarity(&self.embeddings[i], &self.embeddings[candidate]))
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Runs the walk, returning groups of sentence indices (one group per chunk).
    fn run(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();

        for i in 0..self.sentences.len() {
            if current.is_empty() {
                current.push(i);
                continue;
            }
            let max_sim = self.max_sim(&current, i);
            let min_sim = self.windowed_min_sim(&current);
            let threshold = self
                .cfg
                .hard_threshold
                .max(self.cfg.c * min_sim * sigmoid(current.len() as f32));
            if max_sim >= threshold {
                current.push(i);
            } else {
                groups.push(std::mem::take(&mut current));
                current.push(i);
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }
}

/// `true` if `text` is "garbage": empty after trim, has no alphanumerics, or is a
/// single character repeated across more than 80% of the text (step 4).
fn is_garbage(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if !trimmed.chars().any(|c| c.is_alphanumeric()) {
        return true;
    }
    let mut counts = std::collections::HashMap::new();
    for c in trimmed.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let total = trimmed.chars().count();
    if let Some(&max_count) = counts.values().max() {
        if total > 0 && (max_count as f32) / (total as f32) > 0.8 {
            return true;
        }
    }
    false
}

/// Groups `text` into semantically coherent chunks using the Max-Min rule, then
/// filters out chunks below `min_chunk_length` or flagged as garbage, and
/// reindexes survivors contiguously from 0.
///
/// `embed_batch` receives every sentence of `text` at once; callers typically
/// pass `Embedder::embed_batch`.
pub fn chunk_text<F>(text: &str, cfg: &ChunkerConfig, embed_batch: F) -> crate::error::Result<Vec<TextChunk>>
where
    F: FnOnce(&[String]) -> crate::error::Result<Vec<Vec<f32>>>,
{
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Ok(vec![]);
    }
    let embeddings = embed_batch(&sentences)?;
    let walk = MaxMinWalk {
        cfg,
        sentences: &sentences,
        embeddings: &embeddings,
    };
    let groups = walk.run();

    let mut out = Vec::new();
    for group in groups {
        let joined = group
            .iter()
            .map(|&i| sentences[i].as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.len() < cfg.min_chunk_length || is_garbage(&joined) {
            continue;
        }
        out.push(TextChunk {
            index: out.len(),
            text: joined,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    // A deterministic fake embedding: sentences sharing a topic tag get nearby
    // vectors, others are pushed far apart — avoids depending on a real model in
    // unit tests.
    fn fake_embed(sentences: &[String]) -> Vec<Vec<f32>> {
        sentences
            .iter()
            .map(|s| {
                if s.contains("Paris") || s.contains("Seine") || s.contains("Croissant") {
                    vec![1.0, 0.0]
                } else if s.contains("Rust") || s.contains("borrow") {
                    vec![0.0, 1.0]
                } else {
                    vec![0.5, 0.5]
                }
            })
            .collect()
    }

    #[test]
    fn mutually_similar_sentences_form_one_chunk() {
        let text = "Paris is the capital of France. The Seine runs through it. Croissants are popular.";
        let chunks = chunk_text(text, &cfg(), |s| Ok(fake_embed(s))).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Paris"));
        assert!(chunks[0].text.contains("Croissants"));
    }

    #[test]
    fn dissimilar_topics_split_into_separate_chunks() {
        let text = "Paris is the capital of France. The Seine runs through it. \
                     Rust has a strict borrow checker. Rust prevents data races at compile time.";
        let chunks = chunk_text(text, &cfg(), |s| Ok(fake_embed(s))).unwrap();
        assert!(chunks.len() >= 2, "expected a topic split, got {chunks:?}");
    }

    #[test]
    fn garbage_chunks_are_filtered() {
        assert!(is_garbage(""));
        assert!(is_garbage("   "));
        assert!(is_garbage("!!!!!!!!!!"));
        assert!(is_garbage("aaaaaaaaaaaaaaab"));
        assert!(!is_garbage("This is a perfectly normal sentence."));
    }

    #[test]
    fn short_chunks_below_min_length_are_dropped() {
        let mut cfg = cfg();
        cfg.min_chunk_length = 1000;
        let text = "Paris is the capital of France. The Seine runs through it.";
        let chunks = chunk_text(text, &cfg, |s| Ok(fake_embed(s))).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_indices_are_contiguous_from_zero() {
        let text = "Paris is the capital of France. The Seine runs through it. \
                     Rust has a strict borrow checker. Rust prevents data races at compile time.";
        let chunks = chunk_text(text, &cfg(), |s| Ok(fake_embed(s))).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn chunker_is_idempotent() {
        let text = "Paris is the capital of France. The Seine runs through it. Croissants are popular.";
        let a = chunk_text(text, &cfg(), |s| Ok(fake_embed(s))).unwrap();
        let b = chunk_text(text, &cfg(), |s| Ok(fake_embed(s))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn windowed_min_matches_full_min_on_small_inputs() {
        let sentences = vec![
            "Paris is nice.".to_string(),
            "The Seine is a river.".to_string(),
            "Croissants are tasty.".to_string(),
        ];
        let embeddings = fake_embed(&sentences);
        let cfg = cfg();
        let walk = MaxMinWalk {
            cfg: &cfg,
            sentences: &sentences,
            embeddings: &embeddings,
        };
        let current = vec![0, 1, 2];
        assert_eq!(walk.windowed_min_sim(&current), walk.full_min_sim(&current));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_text("", &cfg(), |s| Ok(fake_embed(s))).unwrap();
        assert!(chunks.is_empty());
    }
}
