//! Bounded depth-1 micro-crawl.
//!
//! When the root page yields thin keyword coverage, fetch a handful of
//! same-host secondary pages under a shared byte budget and rescan them.
//! ROI accounting (growth ratio, diminishing returns, partial coverage)
//! rides along in the feature vector.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::config::FeatureFlags;
use crate::fetch::Fetcher;
use crate::keywords::KeywordScanner;
use crate::models::MicroCrawlOutcome;

/// Per-secondary-page fetch timeout.
const PAGE_TIMEOUT: Duration = Duration::from_secs(6);

/// Root pages larger than this already carry enough content to scan.
const MAX_ROOT_CONTENT_LENGTH: i64 = 60_000;

/// Growth ratio below which extra pages stopped paying off.
const DIMINISHING_RATIO: f64 = 1.15;

/// Gate for running the micro-crawl at all.
pub fn should_microcrawl(
    flags: &FeatureFlags,
    is_parked: bool,
    kw_unique_root: u32,
    content_length: i64,
    parked_confidence: f64,
) -> bool {
    flags.microcrawl
        && !is_parked
        && kw_unique_root < 2
        && content_length < MAX_ROOT_CONTENT_LENGTH
        && parked_confidence < 0.5
}

/// pages < 2 never diminishes; a keywordless root diminishes when fewer
/// than two keywords were added; otherwise the growth ratio decides.
pub fn compute_diminishing_returns(baseline: u32, added: u32, pages: u32) -> bool {
    if pages < 2 {
        return false;
    }
    if baseline == 0 {
        return added < 2;
    }
    ((baseline + added) as f64 / baseline as f64) < DIMINISHING_RATIO
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap())
}

/// Candidate secondary links: absolute same-host URLs whose path contains
/// no '.', deduplicated in document order, capped at `max_pages`.
pub fn collect_candidate_links(body: &str, root_url: &str, max_pages: usize) -> Vec<String> {
    let Ok(root) = Url::parse(root_url) else {
        return Vec::new();
    };
    let root_host = root.host_str().map(str::to_string);

    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    for captures in href_regex().captures_iter(body) {
        let href = captures[1].trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("javascript:")
        {
            continue;
        }
        let Ok(absolute) = root.join(href) else {
            continue;
        };
        if absolute.host_str().map(str::to_string) != root_host {
            continue;
        }
        if absolute.path().contains('.') {
            continue;
        }
        if absolute.path() == root.path() {
            continue;
        }
        let normalized = {
            let mut u = absolute.clone();
            u.set_fragment(None);
            u.to_string()
        };
        if seen.insert(normalized.clone()) {
            links.push(normalized);
            if links.len() >= max_pages {
                break;
            }
        }
    }
    links
}

/// Fetch and rescan secondary pages. `root_unique` is the set of unique
/// patterns the root page already produced; the returned vector is the
/// merged unique set.
pub async fn run_microcrawl(
    fetcher: &dyn Fetcher,
    scanner: &dyn KeywordScanner,
    root_url: &str,
    root_body: &str,
    root_unique: &[String],
    set_ids: &[i64],
    adhoc_keywords: &[String],
    flags: &FeatureFlags,
) -> (MicroCrawlOutcome, Vec<String>) {
    let links = collect_candidate_links(root_body, root_url, flags.microcrawl_max_pages as usize);
    let mut unique: BTreeSet<String> = root_unique.iter().cloned().collect();
    let baseline = root_unique.len() as u32;

    let mut remaining_budget = flags.microcrawl_byte_budget;
    let mut exhausted = false;
    let mut pages_fetched = 0u32;

    for link in &links {
        if remaining_budget == 0 {
            exhausted = true;
            break;
        }
        let body = match fetcher.fetch_page(link, PAGE_TIMEOUT, remaining_budget).await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %link, error = %e, "secondary page fetch failed");
                continue;
            }
        };
        pages_fetched += 1;
        remaining_budget = remaining_budget.saturating_sub(body.len());
        if remaining_budget == 0 {
            exhausted = true;
        }

        if let Ok(set_hits) = scanner.scan_by_set_ids(&body, set_ids) {
            for patterns in set_hits.values() {
                unique.extend(patterns.iter().cloned());
            }
        }
        unique.extend(scanner.scan_adhoc_keywords(&body, adhoc_keywords));
    }

    let total = unique.len() as u32;
    let added = total.saturating_sub(baseline);
    let growth_ratio = if baseline > 0 {
        total as f64 / baseline as f64
    } else {
        total as f64
    };

    let outcome = MicroCrawlOutcome {
        used: true,
        pages: pages_fetched,
        exhausted,
        secondary_pages_examined: pages_fetched,
        kw_unique_root: baseline,
        kw_unique_added: added,
        kw_unique: total,
        kw_growth_ratio: growth_ratio,
        diminishing_returns: compute_diminishing_returns(baseline, added, pages_fetched),
        partial_coverage: exhausted,
    };
    (outcome, unique.into_iter().collect())
}
