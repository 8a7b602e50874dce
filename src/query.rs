//! Query-language parser. Hand-rolled sequential scanning, no parser-combinator
//! crate.

/// A metadata filter parsed from a `field:value` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOp {
    And,
    Or,
}

/// Parsed form of a user query ("Query").
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub semantic_terms: Vec<String>,
    pub phrases: Vec<String>,
    pub filters: Vec<Filter>,
    pub exclude_terms: Vec<String>,
    pub boolean_op: BooleanOp,
}

/// Tokenizes and parses `query` into semantic terms, phrases, field filters, and
/// exclude terms:
/// - `"exact phrase"` → phrase.
/// - `field:value` → filter.
/// - `-term` → exclude term.
/// - bare tokens → semantic terms.
/// - a free-standing, case-insensitive `OR` token flips the boolean op to OR.
pub fn parse(query: &str) -> ParsedQuery {
    let mut semantic_terms = Vec::new();
    let mut phrases = Vec::new();
    let mut filters = Vec::new();
    let mut exclude_terms = Vec::new();
    let mut boolean_op = BooleanOp::And;

    let chars: Vec<char> = query.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        if chars[i] == '"' {
            let mut j = i + 1;
            let mut phrase = String::new();
            while j < chars.len() && chars[j] != '"' {
                phrase.push(chars[j]);
                j += 1;
            }
            if !phrase.is_empty() {
                phrases.push(phrase);
            }
            i = if j < chars.len() { j + 1 } else { j };
            continue;
        }
        // bare token: read until next whitespace or quote.
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '"' {
            i += 1;
        }
        let token: String = chars[start..i].iter().collect();
        if token.is_empty() {
            continue;
        }
        if token.eq_ignore_ascii_case("or") {
            boolean_op = BooleanOp::Or;
            continue;
        }
        if let Some(term) = token.strip_prefix('-') {
            if !term.is_empty() {
                exclude_terms.push(term.to_string());
            }
            continue;
        }
        if let Some((field, value)) = token.split_once(':') {
            if !field.is_empty() && !value.is_empty() {
                filters.push(Filter {
                    field: field.to_string(),
                    value: value.to_string(),
                });
                continue;
            }
        }
        semantic_terms.push(token);
    }

    ParsedQuery {
        semantic_terms,
        phrases,
        filters,
        exclude_terms,
        boolean_op,
    }
}

impl ParsedQuery {
    /// Semantic terms joined with spaces plus phrases, used for embedding.
    pub fn to_semantic_query(&self) -> String {
        let mut parts: Vec<&str> = self.semantic_terms.iter().map(String::as_str).collect();
        parts.extend(self.phrases.iter().map(String::as_str));
        parts.join(" ")
    }

    /// FTS-compatible string: phrases quoted, terms joined by the chosen boolean.
    pub fn to_fts_query(&self) -> String {
        let op = match self.boolean_op {
            BooleanOp::And => "AND",
            BooleanOp::Or => "OR",
        };
        let mut parts: Vec<String> = self.semantic_terms.clone();
        parts.extend(self.phrases.iter().map(|p| format!("\"{p}\"")));
        parts.join(&format!(" {op} "))
    }
}
