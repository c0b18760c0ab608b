//! Backend failure classification.
//!
//! The backend signals expired credentials in several ways: a 401/403
//! status, a Cloudflare challenge page, or a JSON envelope
//! `{"code": ..., "msg": "..."}` with a token error. Everything is mapped to a
//! typed [`BackendError`] here so callers branch on the variant only.

use crate::BackendError;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;

/// Envelope codes the backend uses for missing, invalid or expired tokens.
const AUTH_CODES: &[i64] = &[40001, 40002, 40003];

const MAX_SUMMARY_CHARS: usize = 200;

lazy_static! {
    // Token/session rejection
    static ref AUTH_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)invalid[_\s]?token").unwrap(),
        Regex::new(r"(?i)token.*expired").unwrap(),
        Regex::new(r"(?i)unauthori[sz]ed").unwrap(),
        Regex::new(r"(?i)authorization (failed|required)").unwrap(),
        Regex::new(r"(?i)login required").unwrap(),
        Regex::new(r"(?i)not logged in").unwrap(),
    ];

    // Cloudflare interstitials served instead of the API response
    static ref CHALLENGE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)just a moment").unwrap(),
        Regex::new(r"(?i)cf[-_]chl").unwrap(),
        Regex::new(r"(?i)challenge-platform").unwrap(),
        Regex::new(r"(?i)attention required").unwrap(),
    ];
}

fn matches_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(text))
}

fn is_challenge(body: &str) -> bool {
    matches_any(&CHALLENGE_PATTERNS, body)
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('<') {
        return if is_challenge(trimmed) {
            "cloudflare challenge page".to_string()
        } else {
            "html error page".to_string()
        };
    }
    if trimmed.chars().count() > MAX_SUMMARY_CHARS {
        let head: String = trimmed.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

/// Classify a non-success HTTP response.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let summary = summarize(body);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || is_challenge(body)
    {
        return BackendError::AuthExpired(format!("HTTP {}: {}", status.as_u16(), summary));
    }

    if let Some((code, message)) = parse_envelope(body) {
        if code != 0 {
            return classify_envelope(code, &message);
        }
    }

    if matches_any(&AUTH_PATTERNS, body) {
        return BackendError::AuthExpired(format!("HTTP {}: {}", status.as_u16(), summary));
    }

    BackendError::Unavailable(format!("HTTP {}: {}", status.as_u16(), summary))
}

/// Classify a JSON envelope carrying a non-zero `code`.
pub fn classify_envelope(code: i64, message: &str) -> BackendError {
    if AUTH_CODES.contains(&code) || matches_any(&AUTH_PATTERNS, message) {
        BackendError::AuthExpired(format!("code {}: {}", code, message))
    } else {
        BackendError::Unavailable(format!("code {}: {}", code, message))
    }
}

/// Extract `(code, msg)` from `{"code": .., "msg": ..}` bodies.
pub(crate) fn parse_envelope(body: &str) -> Option<(i64, String)> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = value.get("code")?.as_i64()?;
    let message = value
        .get("msg")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}
