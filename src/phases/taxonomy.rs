//! Mapping from raw validator output to the canonical HTTP reason enum.
//!
//! Checks are ordered; the first matching rule wins. Status-string rules
//! run before error-string rules, which run before status-code rules.

use crate::fetch::FetchResult;
use crate::models::{DomainStatus, HttpReason};

/// Classify one fetch result into (status, reason).
/// Successful outcomes carry no reason.
pub fn classify(result: &FetchResult) -> (DomainStatus, Option<HttpReason>) {
    if result.is_success || result.status == "Validated" || result.status == "OK" {
        return (DomainStatus::Ok, None);
    }

    let status = result.status.to_lowercase();
    let error = result.error.to_lowercase();

    if status.contains("statuscodemismatch") {
        return (DomainStatus::Error, Some(HttpReason::StatusCodeMismatch));
    }
    if status.contains("contentmismatch") {
        return (DomainStatus::Error, Some(HttpReason::ContentMismatch));
    }
    if status.contains("fetcherror") {
        return (DomainStatus::Error, Some(HttpReason::FetchError));
    }
    if status.contains("headlessfailed") {
        return (DomainStatus::Error, Some(HttpReason::HeadlessFailed));
    }
    if status.contains("headlesstimeout") {
        return (DomainStatus::Timeout, Some(HttpReason::Timeout));
    }
    if error.contains("timeout") {
        return (DomainStatus::Timeout, Some(HttpReason::Timeout));
    }
    if error.contains("canceled") {
        return (DomainStatus::Error, Some(HttpReason::Canceled));
    }
    if error.contains("connection refused") {
        return (DomainStatus::Error, Some(HttpReason::ConnectionRefused));
    }
    if error.contains("no such host") || error.contains("lookup ") {
        return (DomainStatus::Error, Some(HttpReason::DnsResolveError));
    }
    if error.contains("connection reset") {
        return (DomainStatus::Error, Some(HttpReason::ConnectionReset));
    }
    if error.contains("tls") && error.contains("handshake") {
        return (DomainStatus::Error, Some(HttpReason::TlsHandshake));
    }
    if error.contains("certificate expired") {
        return (DomainStatus::Error, Some(HttpReason::SslExpired));
    }
    if error.contains("certificate") {
        return (DomainStatus::Error, Some(HttpReason::TlsError));
    }
    if error.contains("proxy") {
        return (DomainStatus::Error, Some(HttpReason::ProxyError));
    }

    match result.status_code {
        404 => return (DomainStatus::Error, Some(HttpReason::NotFound)),
        403 => return (DomainStatus::Error, Some(HttpReason::Forbidden)),
        401 => return (DomainStatus::Error, Some(HttpReason::Unauthorized)),
        410 => return (DomainStatus::Error, Some(HttpReason::Gone)),
        429 => return (DomainStatus::Error, Some(HttpReason::RateLimit)),
        451 => return (DomainStatus::Error, Some(HttpReason::UnavailableLegal)),
        code if (500..600).contains(&code) => {
            return (DomainStatus::Error, Some(HttpReason::Upstream5xx));
        }
        _ => {}
    }

    (DomainStatus::Error, Some(HttpReason::Error))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(status: &str) -> FetchResult {
        FetchResult {
            status: status.to_string(),
            ..Default::default()
        }
    }

    fn with_error(error: &str) -> FetchResult {
        FetchResult {
            error: error.to_string(),
            ..Default::default()
        }
    }

    fn with_code(code: i64) -> FetchResult {
        FetchResult {
            status_code: code,
            ..Default::default()
        }
    }

    #[test]
    fn success_signals_yield_ok_without_reason() {
        let validated = FetchResult {
            is_success: true,
            status_code: 200,
            ..Default::default()
        };
        assert_eq!(classify(&validated), (DomainStatus::Ok, None));
        assert_eq!(classify(&with_status("Validated")), (DomainStatus::Ok, None));
        assert_eq!(classify(&with_status("OK")), (DomainStatus::Ok, None));
    }

    #[test]
    fn status_string_rules_in_priority_order() {
        assert_eq!(
            classify(&with_status("StatusCodeMismatch")),
            (DomainStatus::Error, Some(HttpReason::StatusCodeMismatch))
        );
        assert_eq!(
            classify(&with_status("ContentMismatch")),
            (DomainStatus::Error, Some(HttpReason::ContentMismatch))
        );
        assert_eq!(
            classify(&with_status("FetchError")),
            (DomainStatus::Error, Some(HttpReason::FetchError))
        );
        assert_eq!(
            classify(&with_status("HeadlessFailed")),
            (DomainStatus::Error, Some(HttpReason::HeadlessFailed))
        );
        assert_eq!(
            classify(&with_status("HeadlessTimeout")),
            (DomainStatus::Timeout, Some(HttpReason::Timeout))
        );
    }

    #[test]
    fn status_rules_beat_error_rules() {
        let result = FetchResult {
            status: "FetchError".to_string(),
            error: "request timeout".to_string(),
            ..Default::default()
        };
        assert_eq!(
            classify(&result),
            (DomainStatus::Error, Some(HttpReason::FetchError))
        );
    }

    #[test]
    fn error_string_rules() {
        assert_eq!(
            classify(&with_error("context deadline exceeded: timeout")),
            (DomainStatus::Timeout, Some(HttpReason::Timeout))
        );
        assert_eq!(
            classify(&with_error("request canceled by caller")),
            (DomainStatus::Error, Some(HttpReason::Canceled))
        );
        assert_eq!(
            classify(&with_error("dial tcp: connection refused")),
            (DomainStatus::Error, Some(HttpReason::ConnectionRefused))
        );
        assert_eq!(
            classify(&with_error("no such host")),
            (DomainStatus::Error, Some(HttpReason::DnsResolveError))
        );
        assert_eq!(
            classify(&with_error("lookup a.example.com failed")),
            (DomainStatus::Error, Some(HttpReason::DnsResolveError))
        );
        assert_eq!(
            classify(&with_error("read: connection reset by peer")),
            (DomainStatus::Error, Some(HttpReason::ConnectionReset))
        );
        assert_eq!(
            classify(&with_error("tls handshake failure")),
            (DomainStatus::Error, Some(HttpReason::TlsHandshake))
        );
        assert_eq!(
            classify(&with_error("certificate expired last june")),
            (DomainStatus::Error, Some(HttpReason::SslExpired))
        );
        assert_eq!(
            classify(&with_error("certificate signed by unknown authority")),
            (DomainStatus::Error, Some(HttpReason::TlsError))
        );
        assert_eq!(
            classify(&with_error("proxy authentication required")),
            (DomainStatus::Error, Some(HttpReason::ProxyError))
        );
    }

    #[test]
    fn timeout_beats_tls_when_both_present() {
        // "timeout" is checked before the tls/handshake pair.
        assert_eq!(
            classify(&with_error("tls handshake timeout")),
            (DomainStatus::Timeout, Some(HttpReason::Timeout))
        );
    }

    #[test]
    fn status_code_rules() {
        assert_eq!(
            classify(&with_code(404)),
            (DomainStatus::Error, Some(HttpReason::NotFound))
        );
        assert_eq!(
            classify(&with_code(403)),
            (DomainStatus::Error, Some(HttpReason::Forbidden))
        );
        assert_eq!(
            classify(&with_code(401)),
            (DomainStatus::Error, Some(HttpReason::Unauthorized))
        );
        assert_eq!(
            classify(&with_code(410)),
            (DomainStatus::Error, Some(HttpReason::Gone))
        );
        assert_eq!(
            classify(&with_code(429)),
            (DomainStatus::Error, Some(HttpReason::RateLimit))
        );
        assert_eq!(
            classify(&with_code(451)),
            (DomainStatus::Error, Some(HttpReason::UnavailableLegal))
        );
        assert_eq!(
            classify(&with_code(500)),
            (DomainStatus::Error, Some(HttpReason::Upstream5xx))
        );
        assert_eq!(
            classify(&with_code(599)),
            (DomainStatus::Error, Some(HttpReason::Upstream5xx))
        );
    }

    #[test]
    fn unmatched_failures_fall_back_to_generic_error() {
        assert_eq!(
            classify(&with_error("weird unknown condition")),
            (DomainStatus::Error, Some(HttpReason::Error))
        );
        // Not successful, no error text, no matching code.
        assert_eq!(
            classify(&with_code(302)),
            (DomainStatus::Error, Some(HttpReason::Error))
        );
    }
}
