//! Post-fetch enrichment: structural signals, keyword coverage, parked
//! scoring, and the optional micro-crawl, folded into one feature vector
//! per domain.

pub mod microcrawl;
pub mod parked;
pub mod signals;

use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::config::FeatureFlags;
use crate::fetch::{FetchResult, Fetcher};
use crate::keywords::{KeywordScanner, count_occurrences};
use crate::models::{FeatureVector, KeywordCount, KeywordSetHits};

const TOP_KEYWORDS: usize = 3;

/// Build the feature vector for one successfully fetched domain.
/// Runs the micro-crawl when the gate in [`microcrawl::should_microcrawl`]
/// opens.
pub async fn build_feature_vector(
    result: &FetchResult,
    scanner: &dyn KeywordScanner,
    fetcher: &dyn Fetcher,
    set_ids: &[i64],
    adhoc_keywords: &[String],
    flags: &FeatureFlags,
) -> FeatureVector {
    let page_url = if result.final_url.is_empty() {
        format!("https://{}/", result.domain)
    } else {
        result.final_url.clone()
    };

    let structural = signals::extract_signals(&result.raw_body, &page_url);
    let (is_parked, parked_confidence) =
        parked::parked_signals(&result.extracted_title, &result.extracted_content_snippet);

    let set_hits: Vec<KeywordSetHits> = match scanner.scan_by_set_ids(&result.raw_body, set_ids) {
        Ok(hits) => {
            let mut rows: Vec<KeywordSetHits> = hits
                .into_iter()
                .map(|(set_id, patterns)| KeywordSetHits { set_id, patterns })
                .collect();
            rows.sort_by_key(|r| r.set_id);
            rows
        }
        Err(e) => {
            debug!(domain = %result.domain, error = %e, "keyword set scan failed");
            Vec::new()
        }
    };
    let adhoc_hits = scanner.scan_adhoc_keywords(&result.raw_body, adhoc_keywords);

    let mut unique_root: BTreeSet<String> = BTreeSet::new();
    for row in &set_hits {
        unique_root.extend(row.patterns.iter().cloned());
    }
    unique_root.extend(adhoc_hits.iter().cloned());

    let mut counts: Vec<KeywordCount> = unique_root
        .iter()
        .map(|keyword| KeywordCount {
            keyword: keyword.clone(),
            count: count_occurrences(&result.raw_body, keyword),
        })
        .collect();
    let kw_hits_total: u32 = counts.iter().map(|c| c.count).sum();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.keyword.cmp(&b.keyword)));
    counts.truncate(TOP_KEYWORDS);

    let title_has_keyword = unique_root
        .iter()
        .any(|k| count_occurrences(&result.extracted_title, k) > 0);

    let kw_unique_root = unique_root.len() as u32;
    let mut kw_unique = kw_unique_root;

    let microcrawl_outcome = if flags.enrichment
        && microcrawl::should_microcrawl(
            flags,
            is_parked,
            kw_unique_root,
            result.content_length,
            parked_confidence,
        ) {
        let root_unique: Vec<String> = unique_root.iter().cloned().collect();
        let (outcome, merged) = microcrawl::run_microcrawl(
            fetcher,
            scanner,
            &page_url,
            &result.raw_body,
            &root_unique,
            set_ids,
            adhoc_keywords,
            flags,
        )
        .await;
        kw_unique = merged.len() as u32;
        Some(outcome)
    } else {
        None
    };

    FeatureVector {
        status_code: result.status_code,
        fetched_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        content_bytes: result.content_length,
        h1_count: structural.h1_count,
        internal_links: structural.internal_links,
        external_links: structural.external_links,
        link_ratio: structural.link_ratio,
        language: structural.language,
        language_confidence: structural.language_confidence,
        set_hits,
        adhoc_hits,
        title_has_keyword,
        kw_hits_total,
        kw_unique,
        top_keywords: counts,
        parked_confidence,
        is_parked,
        microcrawl: microcrawl_outcome,
    }
}
