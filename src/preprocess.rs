//! Input preprocessing: personal-data redaction, urgency inference,
//! language detection.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::Urgency;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\+?\d[\d\s\-]{8,}\d)").expect("phone regex is valid"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})").expect("email regex is valid")
});

/// Replace phone numbers and email addresses with redaction markers.
/// Applied to each text source independently before concatenation.
pub fn redact_pii(text: &str) -> String {
    let text = PHONE_RE.replace_all(text, "[REDACTED_PHONE]");
    EMAIL_RE.replace_all(&text, "[REDACTED_EMAIL]").into_owned()
}

const HIGH_URGENCY: &[&str] = &[
    "electric shock",
    "exposed wire",
    "sparking",
    "fire",
    "collapse",
    "accident",
    "injury",
    "danger",
    "hazard",
    "urgent",
    "unsafe",
    "immediate",
];

const MEDIUM_URGENCY: &[&str] = &[
    "not working",
    "broken",
    "leak",
    "overflow",
    "garbage",
    "pothole",
];

/// Keyword-tier urgency heuristic over the raw complaint text.
pub fn infer_urgency(text: &str) -> Urgency {
    let t = text.to_lowercase();
    if HIGH_URGENCY.iter().any(|k| t.contains(k)) {
        Urgency::High
    } else if MEDIUM_URGENCY.iter().any(|k| t.contains(k)) {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

/// Detected language code (ISO 639-3), only when detection is confident.
/// Short complaint texts routinely defeat trigram detectors, and filtering
/// retrieval on an unreliable guess empties it; callers treat `None` as
/// "unknown" and skip language scoping.
pub fn detect_lang(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    info.is_reliable().then(|| info.lang().code().to_string())
}
