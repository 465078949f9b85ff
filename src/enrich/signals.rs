//! Structural signals parsed from an HTML body: heading counts, link
//! shape, and a lightweight language guess.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralSignals {
    pub h1_count: u32,
    pub internal_links: u32,
    pub external_links: u32,
    /// Share of links that stay on the page's own host; 0 when linkless.
    pub link_ratio: f64,
    pub language: Option<String>,
    pub language_confidence: f64,
}

fn h1_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<h1[\s>]").unwrap())
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap())
}

/// Extract structural signals for a page fetched from `page_url`.
pub fn extract_signals(body: &str, page_url: &str) -> StructuralSignals {
    let page_host = Url::parse(page_url).ok().and_then(|u| u.host_str().map(str::to_string));

    let h1_count = h1_regex().find_iter(body).count() as u32;

    let mut internal = 0u32;
    let mut external = 0u32;
    for captures in href_regex().captures_iter(body) {
        let href = &captures[1];
        match classify_link(href, page_host.as_deref()) {
            LinkKind::Internal => internal += 1,
            LinkKind::External => external += 1,
            LinkKind::Other => {}
        }
    }
    let total_links = internal + external;
    let link_ratio = if total_links == 0 {
        0.0
    } else {
        internal as f64 / total_links as f64
    };

    let (language, language_confidence) = guess_language(body);

    StructuralSignals {
        h1_count,
        internal_links: internal,
        external_links: external,
        link_ratio,
        language,
        language_confidence,
    }
}

enum LinkKind {
    Internal,
    External,
    Other,
}

fn classify_link(href: &str, page_host: Option<&str>) -> LinkKind {
    let trimmed = href.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
        || trimmed.starts_with("javascript:")
    {
        return LinkKind::Other;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        match (Url::parse(trimmed), page_host) {
            (Ok(url), Some(host)) => {
                if url.host_str() == Some(host) {
                    LinkKind::Internal
                } else {
                    LinkKind::External
                }
            }
            (Ok(_), None) => LinkKind::External,
            (Err(_), _) => LinkKind::Other,
        }
    } else {
        // Relative links stay on-host.
        LinkKind::Internal
    }
}

// Stopword sets, most frequent words per language.
const LANGUAGE_MARKERS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "for", "with", "you", "our", "are"]),
    ("de", &["und", "der", "die", "das", "für", "mit", "sie"]),
    ("fr", &["les", "des", "une", "est", "pour", "avec", "vous"]),
    ("es", &["los", "las", "una", "por", "para", "con", "usted"]),
];

/// Guess the dominant language by stopword frequency. Confidence is the
/// winning language's share of all marker hits.
fn guess_language(body: &str) -> (Option<String>, f64) {
    let lower = body.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return (None, 0.0);
    }

    let mut best: Option<(&str, usize)> = None;
    let mut total_hits = 0usize;
    for (lang, markers) in LANGUAGE_MARKERS {
        let hits = words.iter().filter(|w| markers.contains(*w)).count();
        total_hits += hits;
        if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
            best = Some((lang, hits));
        }
    }
    match best {
        Some((lang, hits)) if total_hits > 0 => (
            Some(lang.to_string()),
            hits as f64 / total_hits as f64,
        ),
        _ => (None, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_h1_tags() {
        let body = "<h1>One</h1><H1 class=\"big\">Two</H1><h2>not me</h2>";
        let signals = extract_signals(body, "https://a.example.com/");
        assert_eq!(signals.h1_count, 2);
    }

    #[test]
    fn classifies_internal_and_external_links() {
        let body = r##"
            <a href="/about">About</a>
            <a href="https://a.example.com/contact">Contact</a>
            <a href="https://other.example.org/">Elsewhere</a>
            <a href="mailto:x@example.com">Mail</a>
            <a href="#top">Top</a>
        "##;
        let signals = extract_signals(body, "https://a.example.com/");
        assert_eq!(signals.internal_links, 2);
        assert_eq!(signals.external_links, 1);
        assert!((signals.link_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn linkless_page_has_zero_ratio() {
        let signals = extract_signals("<p>plain</p>", "https://a.example.com/");
        assert_eq!(signals.internal_links, 0);
        assert_eq!(signals.link_ratio, 0.0);
    }

    #[test]
    fn detects_english() {
        let body = "We are the best plumbers for you and our customers are happy with the service";
        let signals = extract_signals(body, "https://a.example.com/");
        assert_eq!(signals.language.as_deref(), Some("en"));
        assert!(signals.language_confidence > 0.9);
    }

    #[test]
    fn detects_german() {
        let body = "Wir sind die besten Klempner und sie finden das Angebot für jeden mit uns";
        let signals = extract_signals(body, "https://a.example.com/");
        assert_eq!(signals.language.as_deref(), Some("de"));
    }

    #[test]
    fn empty_body_has_no_language() {
        let signals = extract_signals("", "https://a.example.com/");
        assert_eq!(signals.language, None);
        assert_eq!(signals.language_confidence, 0.0);
    }
}
