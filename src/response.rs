//! Decision assembly helpers: excerpts, template substitution, the
//! escalation ladder, and confidence bucketing (see [`crate::types::Confidence`]).

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder regex is valid"));

/// Bounded-length excerpt, char-safe.
pub fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

/// Substitute `{field}` placeholders. Unknown or missing fields become the
/// empty string; a template never fails to render.
pub fn fill_template(template: &str, fields: &HashMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            fields.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Fixed five-step escalation ladder.
///
/// Step *n* triggers at min(fixed_offset_n, waited + bonus_n) for offsets
/// (0, 1, sla, sla+2, sla+5): escalation never jumps ahead of either the SLA
/// clock or how long the user has actually waited. `waited_days` defaults to
/// `sla_days` when unknown.
pub fn escalation_steps(sla_days: i64, waited_days: Option<i64>) -> Vec<String> {
    let waited = waited_days.unwrap_or(sla_days);
    vec![
        "Day 0: Submit via recommended channel and save screenshot/ticket.".to_string(),
        format!(
            "Day {}: If no acknowledgement, re-submit with photo + landmark.",
            1.min(waited)
        ),
        format!(
            "Day {}: If no resolution within SLA ({} days), escalate to ward/zone officer.",
            sla_days.min(waited),
            sla_days
        ),
        format!(
            "Day {}: If still unresolved, email commissioner/municipal grievance cell with prior ticket proof.",
            (sla_days + 2).min(waited + 2)
        ),
        format!(
            "Day {}: File on state grievance portal / RTI if applicable (attach evidence).",
            (sla_days + 5).min(waited + 5)
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_text() {
        let long = "x".repeat(300);
        let s = snippet(&long, 240);
        assert_eq!(s.chars().count(), 243);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short", 240), "short");
    }

    #[test]
    fn fill_template_substitutes_and_blanks_missing() {
        let fields: HashMap<String, String> = [
            ("category".to_string(), "Pothole".to_string()),
            ("location".to_string(), "Ward 12, Pune".to_string()),
        ]
        .into_iter()
        .collect();
        let out = fill_template(
            "Complaint for {category} at {location}. Pole: {pole_number_optional}.",
            &fields,
        );
        assert_eq!(out, "Complaint for Pothole at Ward 12, Pune. Pole: .");
    }

    #[test]
    fn ladder_has_five_steps_anchored_on_sla() {
        let steps = escalation_steps(7, None);
        assert_eq!(steps.len(), 5);
        assert!(steps[0].starts_with("Day 0:"));
        assert!(steps[1].starts_with("Day 1:"));
        assert!(steps[2].starts_with("Day 7:"));
        assert!(steps[2].contains("7 days"));
        assert!(steps[3].starts_with("Day 9:"));
        assert!(steps[4].starts_with("Day 12:"));
    }

    #[test]
    fn ladder_never_jumps_ahead_of_waited_days() {
        let steps = escalation_steps(7, Some(3));
        assert!(steps[2].starts_with("Day 3:"));
        assert!(steps[3].starts_with("Day 5:"));
        assert!(steps[4].starts_with("Day 8:"));

        // Waiting zero days pins the early rungs to day 0.
        let steps = escalation_steps(7, Some(0));
        assert!(steps[1].starts_with("Day 0:"));
    }
}
