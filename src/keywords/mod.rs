//! Keyword scanner contract and the regex-backed default implementation.
//!
//! Scanners are pure functions from body bytes and pattern inputs; the
//! same body and patterns always yield the same hits.

use std::collections::HashMap;

use anyhow::Result;
use regex::RegexBuilder;

use crate::store::StoreHandle;

/// Resolves keyword patterns and scans page bodies for them.
pub trait KeywordScanner: Send + Sync {
    /// Scan `body` against the patterns of each keyword set, keyed by set id.
    fn scan_by_set_ids(&self, body: &str, set_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>>;

    /// Scan `body` against an ad-hoc keyword list.
    fn scan_adhoc_keywords(&self, body: &str, keywords: &[String]) -> Vec<String>;
}

/// Case-insensitive occurrence count of `keyword` in `body`.
/// Patterns that fail to compile as regex fall back to literal matching.
pub fn count_occurrences(body: &str, keyword: &str) -> u32 {
    match build_pattern(keyword) {
        Some(re) => re.find_iter(body).count() as u32,
        None => 0,
    }
}

/// The subset of `patterns` that match `body` at least once.
pub fn matching_patterns(body: &str, patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| count_occurrences(body, p) > 0)
        .cloned()
        .collect()
}

fn build_pattern(keyword: &str) -> Option<regex::Regex> {
    let compiled = RegexBuilder::new(keyword)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(keyword))
                .case_insensitive(true)
                .build()
        });
    compiled.ok()
}

/// Default scanner: resolves set patterns from the store and matches with
/// case-insensitive regexes.
pub struct RegexKeywordScanner {
    store: StoreHandle,
}

impl RegexKeywordScanner {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }
}

impl KeywordScanner for RegexKeywordScanner {
    fn scan_by_set_ids(&self, body: &str, set_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut hits = HashMap::new();
        for &set_id in set_ids {
            let patterns = self.store.lock()?.get_keyword_set_patterns(set_id)?;
            let matched = matching_patterns(body, &patterns);
            if !matched.is_empty() {
                hits.insert(set_id, matched);
            }
        }
        Ok(hits)
    }

    fn scan_adhoc_keywords(&self, body: &str, keywords: &[String]) -> Vec<String> {
        matching_patterns(body, keywords)
    }
}
