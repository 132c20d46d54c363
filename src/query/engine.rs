//! Query evaluation
//!
//! The evaluator walks the AST once per active segment, producing a
//! docId -> score map restricted to that segment's live documents, then
//! union-merges the per-segment maps (scores added on overlap). BM25
//! statistics (N, avgDL, df) are computed over live documents before
//! evaluation starts so every segment scores against the same numbers.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::ast::{BoolOp, QueryNode, SortDirective};
use super::parser::QueryParser;
use crate::docstore::{DocStore, DocType, Document};
use crate::error::{EngineError, Result};
use crate::highlight::{Snippet, SnippetGenerator};
use crate::index::{DiskSegment, IndexManager};
use crate::scoring::Bm25Scorer;

/// Upper bound on accepted query strings, in bytes
pub const MAX_QUERY_BYTES: usize = 2048;

/// One ranked result
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub document: Document,
    pub score: f64,
    pub snippets: Vec<Snippet>,
}

/// A completed search
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total_matches: usize,
    pub elapsed_ms: u64,
    pub query: String,
}

/// Memoized DocStore lookups for the duration of one query
struct DocCache<'a> {
    store: &'a DocStore,
    docs: HashMap<u32, Option<Document>>,
}

impl<'a> DocCache<'a> {
    fn new(store: &'a DocStore) -> Self {
        Self {
            store,
            docs: HashMap::new(),
        }
    }

    fn get(&mut self, doc_id: u32) -> Result<Option<Document>> {
        if let Some(cached) = self.docs.get(&doc_id) {
            return Ok(cached.clone());
        }
        let document = self.store.find_by_id(doc_id)?;
        self.docs.insert(doc_id, document.clone());
        Ok(document)
    }
}

pub struct QueryEngine {
    manager: Arc<IndexManager>,
    snippets: SnippetGenerator,
    normalize_file_names: bool,
}

impl QueryEngine {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        let config = manager.config();
        let snippets = SnippetGenerator::new(config.snippet_context_chars, config.max_snippets);
        Self {
            manager,
            snippets,
            normalize_file_names: true,
        }
    }

    /// Disable the bare-filename rewrite (used by tests)
    pub fn without_filename_normalization(mut self) -> Self {
        self.normalize_file_names = false;
        self
    }

    pub fn search(&self, query_string: &str, limit: usize) -> Result<SearchResult> {
        if query_string.len() > MAX_QUERY_BYTES {
            return Err(EngineError::Validation(format!(
                "query exceeds {MAX_QUERY_BYTES} bytes"
            )));
        }
        let start = Instant::now();

        let effective = if self.normalize_file_names {
            normalize_direct_file_name_query(query_string)
        } else {
            query_string.trim().to_string()
        };
        let parsed = QueryParser::parse(&effective)?;

        let store = self.manager.doc_store();
        let total_docs = store.total_doc_count()?.max(1);
        let avg_doc_length = store.average_doc_length()?.max(1.0);
        let config = self.manager.config();
        let scorer =
            Bm25Scorer::with_params(total_docs, avg_doc_length, config.bm25_k1, config.bm25_b);

        let query_terms = parsed.ast.terms();
        let segments = self.manager.get_active_segments();
        let mut cache = DocCache::new(store);
        let global_df = build_global_doc_frequency(&segments, &query_terms, &mut cache)?;

        let mut merged: HashMap<u32, f64> = HashMap::new();
        for segment in segments.iter() {
            let live_ids = segment_live_ids(segment, &mut cache)?;
            let scores = evaluate_node(
                &parsed.ast,
                segment,
                &live_ids,
                &global_df,
                &scorer,
                &mut cache,
            )?;
            merge_scores(&mut merged, scores);
        }

        let total_matches = merged.len();
        let ranked = rank_hits(merged, parsed.sort.as_ref(), limit, &mut cache)?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (doc_id, score) in ranked {
            let Some(document) = cache.get(doc_id)? else {
                continue;
            };
            let content = read_content_quietly(Path::new(&document.path));
            let snippets = self.snippets.generate(&content, &query_terms, &[]);
            hits.push(SearchHit {
                document,
                score,
                snippets,
            });
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(query = query_string, hits = hits.len(), elapsed_ms, "search finished");
        Ok(SearchResult {
            hits,
            total_matches,
            elapsed_ms,
            query: query_string.to_string(),
        })
    }
}

/// Rewrite a bare `name.ext` token into a filename lookup. Disabled when
/// the query carries any DSL metacharacters.
pub fn normalize_direct_file_name_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }
    let has_meta = trimmed.contains(':')
        || trimmed.contains(' ')
        || trimmed.contains('\t')
        || trimmed.contains('"')
        || trimmed.contains('(')
        || trimmed.contains(')')
        || trimmed.contains('*')
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.starts_with('-');
    if has_meta || !trimmed.contains('.') {
        return trimmed.to_string();
    }
    format!("filename:\"{trimmed}\"")
}

fn read_content_quietly(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read document content");
            String::new()
        }
    }
}

/// Live docIds of one segment: present in postings, not tombstoned, and
/// still known to the DocStore
fn segment_live_ids(segment: &DiskSegment, cache: &mut DocCache) -> Result<HashSet<u32>> {
    let mut live = HashSet::new();
    for doc_id in segment.live_doc_ids() {
        if cache.get(doc_id)?.is_some() {
            live.insert(doc_id);
        }
    }
    Ok(live)
}

/// df(t) = count of distinct live docIds carrying t across all segments
fn build_global_doc_frequency(
    segments: &[Arc<DiskSegment>],
    terms: &[String],
    cache: &mut DocCache,
) -> Result<HashMap<String, u32>> {
    let mut frequencies = HashMap::with_capacity(terms.len());
    for term in terms {
        let mut seen: HashSet<u32> = HashSet::new();
        for segment in segments {
            let Some(list) = segment.get_postings(term)? else {
                continue;
            };
            for doc_id in list.doc_ids {
                if segment.is_deleted(doc_id) {
                    continue;
                }
                if cache.get(doc_id)?.is_some() {
                    seen.insert(doc_id);
                }
            }
        }
        frequencies.insert(term.clone(), seen.len() as u32);
    }
    Ok(frequencies)
}

fn merge_scores(target: &mut HashMap<u32, f64>, source: HashMap<u32, f64>) {
    for (doc_id, score) in source {
        *target.entry(doc_id).or_insert(0.0) += score;
    }
}

fn evaluate_node(
    node: &QueryNode,
    segment: &DiskSegment,
    live_ids: &HashSet<u32>,
    global_df: &HashMap<String, u32>,
    scorer: &Bm25Scorer,
    cache: &mut DocCache,
) -> Result<HashMap<u32, f64>> {
    match node {
        QueryNode::Term(term) => evaluate_term(term, segment, global_df, scorer, cache),
        QueryNode::Prefix(prefix) => {
            let normalized = prefix.to_lowercase();
            if normalized.is_empty() {
                return Ok(HashMap::new());
            }
            let mut scores = HashMap::new();
            for term in segment.prefix_terms(&normalized) {
                let term_scores = evaluate_term(&term, segment, global_df, scorer, cache)?;
                merge_scores(&mut scores, term_scores);
            }
            Ok(scores)
        }
        QueryNode::Phrase(terms) => evaluate_phrase(terms, segment, global_df, scorer, cache),
        QueryNode::Not(child) => {
            let child_scores =
                evaluate_node(child, segment, live_ids, global_df, scorer, cache)?;
            Ok(live_ids
                .iter()
                .filter(|doc_id| !child_scores.contains_key(doc_id))
                .map(|doc_id| (*doc_id, 0.0))
                .collect())
        }
        QueryNode::Bool { op, left, right } => {
            let left_scores = evaluate_node(left, segment, live_ids, global_df, scorer, cache)?;
            let right_scores = evaluate_node(right, segment, live_ids, global_df, scorer, cache)?;
            match op {
                BoolOp::And => Ok(left_scores
                    .into_iter()
                    .filter_map(|(doc_id, score)| {
                        right_scores.get(&doc_id).map(|other| (doc_id, score + other))
                    })
                    .collect()),
                BoolOp::Or => {
                    let mut merged = left_scores;
                    merge_scores(&mut merged, right_scores);
                    Ok(merged)
                }
            }
        }
        QueryNode::Field { field, value } => {
            evaluate_field(field, value, segment, live_ids, cache)
        }
        QueryNode::Range { field, from, to } => {
            evaluate_range(field, from, to, segment, live_ids, cache)
        }
    }
}

fn evaluate_term(
    term: &str,
    segment: &DiskSegment,
    global_df: &HashMap<String, u32>,
    scorer: &Bm25Scorer,
    cache: &mut DocCache,
) -> Result<HashMap<u32, f64>> {
    let normalized = term.to_lowercase();
    if normalized.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let Some(list) = segment.get_postings(&normalized)? else {
        return Ok(HashMap::new());
    };
    let doc_freq = global_df
        .get(&normalized)
        .copied()
        .unwrap_or_else(|| segment.doc_freq(&normalized));
    if doc_freq == 0 {
        return Ok(HashMap::new());
    }

    let mut scores = HashMap::with_capacity(list.len());
    for (index, &doc_id) in list.doc_ids.iter().enumerate() {
        if segment.is_deleted(doc_id) {
            continue;
        }
        let Some(document) = cache.get(doc_id)? else {
            continue;
        };
        let score = scorer.score(list.term_freqs[index], doc_freq, document.token_count);
        scores.insert(doc_id, score);
    }
    Ok(scores)
}

fn evaluate_phrase(
    terms: &[String],
    segment: &DiskSegment,
    global_df: &HashMap<String, u32>,
    scorer: &Bm25Scorer,
    cache: &mut DocCache,
) -> Result<HashMap<u32, f64>> {
    let normalized: Vec<String> = terms
        .iter()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.trim().is_empty())
        .collect();
    if normalized.is_empty() {
        return Ok(HashMap::new());
    }

    // Per-term score maps double as the candidate docId sets
    let mut term_scores: Vec<HashMap<u32, f64>> = Vec::with_capacity(normalized.len());
    for term in &normalized {
        term_scores.push(evaluate_term(term, segment, global_df, scorer, cache)?);
    }

    let candidates: Vec<u32> = term_scores[0]
        .keys()
        .filter(|doc_id| term_scores.iter().all(|m| m.contains_key(doc_id)))
        .copied()
        .collect();

    let mut phrase_scores = HashMap::new();
    for doc_id in candidates {
        if !phrase_matches_in_doc(&normalized, segment, doc_id)? {
            continue;
        }
        let score: f64 = term_scores
            .iter()
            .map(|m| m.get(&doc_id).copied().unwrap_or(0.0))
            .sum();
        phrase_scores.insert(doc_id, score);
    }
    Ok(phrase_scores)
}

/// Verify a consecutive-position chain: for each successive term there must
/// be a position exactly one past a surviving position of the previous term
fn phrase_matches_in_doc(terms: &[String], segment: &DiskSegment, doc_id: u32) -> Result<bool> {
    let mut positions_by_term = Vec::with_capacity(terms.len());
    for term in terms {
        let positions = segment.positions_for_doc(term, doc_id)?;
        if positions.is_empty() {
            return Ok(false);
        }
        positions_by_term.push(positions);
    }

    let mut expected: HashSet<u32> = positions_by_term[0].iter().map(|p| p + 1).collect();
    for positions in &positions_by_term[1..] {
        let mut next_expected = HashSet::new();
        for &position in positions {
            if expected.contains(&position) {
                next_expected.insert(position + 1);
            }
        }
        if next_expected.is_empty() {
            return Ok(false);
        }
        expected = next_expected;
    }
    Ok(true)
}

fn evaluate_field(
    field: &str,
    value: &str,
    segment: &DiskSegment,
    live_ids: &HashSet<u32>,
    cache: &mut DocCache,
) -> Result<HashMap<u32, f64>> {
    let candidates = match field {
        "path" => cache.store.find_doc_ids_by_path_prefix(value)?,
        "ext" => cache.store.find_doc_ids_by_extension(value)?,
        "filename" | "name" => cache.store.find_doc_ids_by_file_name(value)?,
        "type" => match DocType::parse(value) {
            Some(doc_type) => cache.store.find_doc_ids_by_type(doc_type)?,
            None => return Ok(HashMap::new()),
        },
        _ => return Ok(HashMap::new()),
    };
    Ok(restrict_to_segment(candidates, segment, live_ids))
}

fn evaluate_range(
    field: &str,
    from: &str,
    to: &str,
    segment: &DiskSegment,
    live_ids: &HashSet<u32>,
    cache: &mut DocCache,
) -> Result<HashMap<u32, f64>> {
    // Malformed literals yield an empty result set, not an error
    let candidates = match field {
        "size" => match (from.parse::<u64>(), to.parse::<u64>()) {
            (Ok(min), Ok(max)) => cache.store.find_doc_ids_by_size_range(min, max)?,
            _ => return Ok(HashMap::new()),
        },
        "mtime" => match (parse_instant(from), parse_instant(to)) {
            (Some(min), Some(max)) => cache.store.find_doc_ids_by_mtime_range(min, max)?,
            _ => return Ok(HashMap::new()),
        },
        _ => return Ok(HashMap::new()),
    };
    Ok(restrict_to_segment(candidates, segment, live_ids))
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn restrict_to_segment(
    candidates: Vec<u32>,
    segment: &DiskSegment,
    live_ids: &HashSet<u32>,
) -> HashMap<u32, f64> {
    candidates
        .into_iter()
        .filter(|doc_id| live_ids.contains(doc_id) && !segment.is_deleted(*doc_id))
        .map(|doc_id| (doc_id, 1.0))
        .collect()
}

/// Order by the sort directive (descending mtime/size, unknown falls back
/// to score), tie-breaking by ascending docId, then truncate to `limit`
fn rank_hits(
    scores: HashMap<u32, f64>,
    sort: Option<&SortDirective>,
    limit: usize,
    cache: &mut DocCache,
) -> Result<Vec<(u32, f64)>> {
    let mut entries: Vec<(u32, f64)> = scores.into_iter().collect();

    let sort_field = sort.map(|s| s.field.as_str());
    match sort_field {
        Some("mtime") | Some("size") => {
            let mut keyed: Vec<(u32, f64, u64)> = Vec::with_capacity(entries.len());
            for (doc_id, score) in entries {
                let key = match cache.get(doc_id)? {
                    Some(doc) if sort_field == Some("mtime") => {
                        doc.mtime.timestamp_millis().max(0) as u64
                    }
                    Some(doc) => doc.size_bytes,
                    None => 0,
                };
                keyed.push((doc_id, score, key));
            }
            keyed.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
            entries = keyed.into_iter().map(|(d, s, _)| (d, s)).collect();
        }
        _ => {
            entries.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
        }
    }

    entries.truncate(limit);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_direct_file_name() {
        assert_eq!(
            normalize_direct_file_name_query("readme.md"),
            "filename:\"readme.md\""
        );
        assert_eq!(normalize_direct_file_name_query("readme"), "readme");
        assert_eq!(normalize_direct_file_name_query("ext:md"), "ext:md");
        assert_eq!(
            normalize_direct_file_name_query("a.md b.md"),
            "a.md b.md"
        );
        assert_eq!(normalize_direct_file_name_query("-a.md"), "-a.md");
        assert_eq!(normalize_direct_file_name_query("  spaced.md  "), "filename:\"spaced.md\"");
        assert_eq!(normalize_direct_file_name_query("/etc/a.md"), "/etc/a.md");
    }

    #[test]
    fn test_parse_instant() {
        assert!(parse_instant("2025-01-01T00:00:00Z").is_some());
        assert!(parse_instant("2025-01-01").is_none());
        assert!(parse_instant("garbage").is_none());
    }
}
