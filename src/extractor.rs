//! Heuristic extraction of authentication artifacts from email text.
//!
//! Extraction is pure and deterministic: tiers are tried from most to least specific
//! and the first tier that matches wins. A more specific tier always carries a higher
//! confidence than a more general one.
//!
//! # Example
//!
//! ```
//! use email_auth_flow::extractor::{extract_code, extract_magic_link};
//!
//! let link = extract_magic_link("Click to verify: https://app.example.com/auth/verify?t=abc123 Thanks");
//! assert_eq!(link.value, "https://app.example.com/auth/verify?t=abc123");
//!
//! let code = extract_code("Your code is 482913");
//! assert_eq!(code.value, "482913");
//! ```

use crate::model::{ArtifactType, Email, ExtractionResult};
use regex::Regex;
use std::sync::LazyLock;

/// Confidence of a URL whose path or query names an authentication action.
pub const KEYWORD_LINK_CONFIDENCE: f64 = 0.9;
/// Confidence of any other acceptable HTTPS URL.
pub const FALLBACK_LINK_CONFIDENCE: f64 = 0.6;

/// Path/query keywords that mark a URL as an authentication link.
const AUTH_KEYWORDS: &[&str] = &[
    "verify",
    "verification",
    "auth",
    "login",
    "confirm",
    "activate",
    "magic",
    "token",
    "signin",
    "sign-in",
    "callback",
    "validate",
];

/// Substrings that disqualify a URL from the HTTPS fallback tier.
const DENIED_SUBSTRINGS: &[&str] = &[
    "unsubscribe",
    "privacy",
    "terms",
    "preferences",
    "support",
    "help",
];

/// Sentence punctuation that may trail a URL in prose.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\'', '"', '>'];

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s<>"'`]+"#).expect("valid regex"));

/// One code tier: pattern with a single capture group and its confidence.
struct CodeTier {
    name: &'static str,
    regex: Regex,
    confidence: f64,
}

impl CodeTier {
    fn new(name: &'static str, pattern: &str, confidence: f64) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("valid regex"),
            confidence,
        }
    }
}

static CODE_TIERS: LazyLock<Vec<CodeTier>> = LazyLock::new(|| {
    vec![
        CodeTier::new(
            "labelled code",
            r"(?i)\b(?:code|verification|token|otp|pin|passcode)(?:\s+is)?\s*[:#]?\s*(\d{4,8})\b",
            0.95,
        ),
        CodeTier::new("6-digit code", r"\b(\d{6})\b", 0.85),
        CodeTier::new("4-digit code", r"\b(\d{4})\b", 0.7),
        CodeTier::new("8-digit code", r"\b(\d{8})\b", 0.6),
    ]
});

/// Extracts a magic link from free-form text.
#[must_use]
pub fn extract_magic_link(text: &str) -> ExtractionResult {
    let candidates: Vec<String> = URL_PATTERN
        .find_iter(text)
        .map(|m| clean_url(m.as_str()))
        .collect();

    if let Some(url) = candidates.iter().find(|url| has_auth_keyword(url)) {
        return ExtractionResult::found(ArtifactType::MagicLink, url.clone(), KEYWORD_LINK_CONFIDENCE);
    }

    if let Some(url) = candidates
        .iter()
        .find(|url| url.to_ascii_lowercase().starts_with("https://") && !is_denied(url))
    {
        return ExtractionResult::found(ArtifactType::MagicLink, url.clone(), FALLBACK_LINK_CONFIDENCE);
    }

    ExtractionResult::not_found(
        ArtifactType::MagicLink,
        if candidates.is_empty() {
            "no URL in email"
        } else {
            "no URL with authentication keywords and no acceptable HTTPS fallback"
        },
    )
}

/// Extracts a numeric code from free-form text, typed as a verification code.
#[must_use]
pub fn extract_code(text: &str) -> ExtractionResult {
    extract_code_as(ArtifactType::VerificationCode, text)
}

/// Extracts a numeric code and labels the result with `kind`.
#[must_use]
pub fn extract_code_as(kind: ArtifactType, text: &str) -> ExtractionResult {
    for tier in CODE_TIERS.iter() {
        if let Some(code) = tier.regex.captures(text).and_then(|caps| caps.get(1)) {
            tracing::trace!(tier = tier.name, "code tier matched");
            return ExtractionResult::found(kind, code.as_str(), tier.confidence);
        }
    }
    ExtractionResult::not_found(kind, "no numeric code in email")
}

/// Classifies an email for the requested artifact kind.
///
/// The body is searched first; the subject is used when the body yields nothing,
/// since providers often put short codes in the subject line.
#[must_use]
pub fn extract_for_type(kind: ArtifactType, email: &Email) -> ExtractionResult {
    let extract = |text: &str| {
        if kind.is_link() {
            extract_magic_link(text)
        } else {
            extract_code_as(kind, text)
        }
    };

    let mut result = extract(&email.body);
    if !result.success && !email.subject.is_empty() {
        let from_subject = extract(&email.subject);
        if from_subject.success {
            result = from_subject;
        }
    }
    result.with_source(email.reference())
}

/// Returns whichever of link or code classifies the email with higher confidence.
#[must_use]
pub fn extract_any(email: &Email) -> ExtractionResult {
    let link = extract_for_type(ArtifactType::MagicLink, email);
    let code = extract_for_type(ArtifactType::VerificationCode, email);
    match (link.success, code.success) {
        (true, true) if code.confidence > link.confidence => code,
        (true, _) => link,
        (false, true) => code,
        (false, false) => ExtractionResult::not_found(
            ArtifactType::MagicLink,
            "no authentication link or code in email",
        )
        .with_source(email.reference()),
    }
}

fn clean_url(raw: &str) -> String {
    raw.trim_end_matches(TRAILING_PUNCTUATION).replace("&amp;", "&")
}

fn is_denied(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    DENIED_SUBSTRINGS.iter().any(|denied| lower.contains(denied))
}

/// Looks for a keyword in the part of the URL after the host.
fn has_auth_keyword(url: &str) -> bool {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let Some(start) = after_scheme.find(['/', '?']) else {
        return false;
    };
    let path_and_query = after_scheme[start..].to_ascii_lowercase();
    AUTH_KEYWORDS
        .iter()
        .any(|keyword| path_and_query.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn email(subject: &str, body: &str) -> Email {
        Email {
            uid: 7,
            subject: subject.into(),
            sender: "noreply@app.example.com".into(),
            recipient: "qa@example.com".into(),
            body: body.into(),
            received_at: Utc::now(),
            preview: String::new(),
        }
    }

    #[test]
    fn test_magic_link_preserves_query_string() {
        let result =
            extract_magic_link("Click to verify: https://app.example.com/auth/verify?t=abc123 Thanks");
        assert!(result.success);
        assert_eq!(result.value, "https://app.example.com/auth/verify?t=abc123");
        assert!((result.confidence - KEYWORD_LINK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keyword_link_beats_earlier_plain_link() {
        let text = "Visit https://example.com/blog first. \
                    Then sign in at https://example.com/login?next=%2Fhome&x=1.";
        let result = extract_magic_link(text);
        assert_eq!(result.value, "https://example.com/login?next=%2Fhome&x=1");
        assert!(result.confidence > FALLBACK_LINK_CONFIDENCE);
    }

    #[test]
    fn test_fallback_link_skips_denied_urls() {
        let text = "https://example.com/unsubscribe?id=1 and https://example.com/welcome/abc";
        let result = extract_magic_link(text);
        assert_eq!(result.value, "https://example.com/welcome/abc");
        assert!((result.confidence - FALLBACK_LINK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keyword_link_with_denied_word_stays_tier_one() {
        let url = "https://app.example.com/auth/verify?t=abc&next=%2Fsettings%2Fpreferences";
        let result = extract_magic_link(&format!("Sign in: {url}"));
        assert!(result.success);
        assert_eq!(result.value, url);
        assert!((result.confidence - KEYWORD_LINK_CONFIDENCE).abs() < f64::EPSILON);

        let result = extract_magic_link(
            "Questions? https://example.com/faq or https://help.example.com/auth/verify?t=9",
        );
        assert_eq!(result.value, "https://help.example.com/auth/verify?t=9");
        assert!((result.confidence - KEYWORD_LINK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_only_denied_https_links_are_rejected() {
        let result = extract_magic_link("https://example.com/privacy and https://help.example.com/");
        assert!(!result.success);
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_keyword_in_host_only_is_not_tier_one() {
        let result = extract_magic_link("See https://auth.example.com/ for details");
        assert!((result.confidence - FALLBACK_LINK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plain_http_without_keyword_is_rejected() {
        let result = extract_magic_link("Our site: http://example.com/home");
        assert!(!result.success);
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_html_href_and_entities() {
        let html = r#"<a href="https://app.example.com/magic?token=x1&amp;user=7">Sign in</a>"#;
        let result = extract_magic_link(html);
        assert_eq!(result.value, "https://app.example.com/magic?token=x1&user=7");
    }

    #[test]
    fn test_code_plain_sentence() {
        let result = extract_code("Your code is 482913");
        assert!(result.success);
        assert_eq!(result.value, "482913");
    }

    #[test]
    fn test_labelled_code_wins_over_bare_digits() {
        let result = extract_code("Order 123456 shipped. Verification: 9911");
        assert_eq!(result.value, "9911");
        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_code_tier_confidences_decrease() {
        let six = extract_code("use 123456 now");
        let four = extract_code("use 1234 now");
        let eight = extract_code("use 12345678 now");
        assert_eq!(six.value, "123456");
        assert_eq!(four.value, "1234");
        assert_eq!(eight.value, "12345678");
        assert!(six.confidence > four.confidence);
        assert!(four.confidence > eight.confidence);
    }

    #[test]
    fn test_no_code_is_negative_result() {
        let result = extract_code("Welcome aboard!");
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("no numeric code in email"));
    }

    #[test]
    fn test_extract_for_type_falls_back_to_subject() {
        let mail = email("Your login code: 555111", "See subject.");
        let result = extract_for_type(ArtifactType::TwoFactorCode, &mail);
        assert_eq!(result.value, "555111");
        assert_eq!(result.artifact_type, ArtifactType::TwoFactorCode);
        assert_eq!(result.source.map(|s| s.uid), Some(7));
    }

    #[test]
    fn test_extract_any_prefers_more_confident_artifact() {
        let mail = email(
            "Welcome",
            "Your verification code: 123456. Or visit https://example.com/home",
        );
        let result = extract_any(&mail);
        assert_eq!(result.value, "123456");
    }
}
