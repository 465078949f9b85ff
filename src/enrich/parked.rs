//! Parked-domain heuristic.
//!
//! Weighted substring scoring over the lowercased title and content
//! snippet. Confidence is matched weight over total weight; a page is
//! parked once the ratio reaches the threshold.

const PARKED_SIGNALS: &[(&str, u32)] = &[
    ("parked", 3),
    ("buy this domain", 4),
    ("sedo", 2),
    ("namecheap", 1),
    ("godaddy", 1),
    ("coming soon", 2),
];

const PARKED_THRESHOLD: f64 = 0.30;

/// Score title + snippet for parked-page signals.
/// Returns `(is_parked, confidence)` where confidence is the ratio of
/// matched signal weight to the total weight of all evaluated signals.
pub fn parked_signals(title: &str, snippet: &str) -> (bool, f64) {
    let haystack = format!("{} {}", title, snippet).to_lowercase();
    let total_weight: u32 = PARKED_SIGNALS.iter().map(|(_, w)| w).sum();
    let matched_weight: u32 = PARKED_SIGNALS
        .iter()
        .filter(|(signal, _)| haystack.contains(signal))
        .map(|(_, w)| w)
        .sum();
    let confidence = matched_weight as f64 / total_weight as f64;
    (confidence >= PARKED_THRESHOLD, confidence)
}
