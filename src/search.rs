//! Bookmark search with a relevance cut-off.
//!
//! The store ranks matches through SQLite FTS5 (BM25, negated so higher is
//! better). [`affinity_filter`] then drops everything scoring below a
//! configured percentage of the best hit.

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::models::SearchResult;
use crate::store::Store;

/// Lower-cased alphanumeric terms of a free-text query.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// An FTS5 `MATCH` expression OR-ing the quoted query terms.
///
/// Quoting keeps user input from being read as FTS5 syntax. Returns
/// `None` when the query has no searchable terms.
pub fn fts_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Keep results scoring at least `affinity` percent of the top score.
///
/// `results` must be ordered best first. A lone result is always kept.
pub fn affinity_filter(results: Vec<SearchResult>, affinity: u32) -> Vec<SearchResult> {
    let Some(top) = results.first().map(|r| r.score) else {
        return results;
    };
    let threshold = top / (100.0 / f64::from(affinity.clamp(1, 100)));
    results
        .into_iter()
        .filter(|r| r.score >= threshold)
        .collect()
}

/// Search an organization's bookmarks and apply the affinity cut-off.
pub async fn search(
    store: &dyn Store,
    org: &str,
    query: &str,
    retrieval: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let results = store
        .search_bookmarks(org, query, retrieval.final_limit)
        .await?;
    Ok(affinity_filter(results, retrieval.search_affinity))
}
