//! Channel recommendation: multi-criteria scoring of candidate submission
//! channels under urgency, live channel health, and user preference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::TextEmbedder;
use crate::index::{collections, Filter, VectorIndex, DENSE_TEXT};
use crate::types::Urgency;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelScore {
    pub channel: String,
    pub score: f32,
}

/// Full per-channel score list plus the liveness flag that was used,
/// exposed for explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTrace {
    pub scored: Vec<ChannelScore>,
    pub portal_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub best: Option<String>,
    pub backup: Option<String>,
    pub trace: ChannelTrace,
}

/// Additive scoring rule for one channel.
///
/// The preference bias (+1.5) can outweigh a single urgency tier but not
/// the portal-down penalty (−2.5).
pub fn score_channel(
    channel: &str,
    urgency: Urgency,
    portal_ok: bool,
    user_pref: Option<&str>,
) -> f32 {
    let mut score = match urgency {
        Urgency::High => {
            if matches!(channel, "helpline" | "email") {
                2.0
            } else {
                0.6
            }
        }
        Urgency::Medium => {
            if matches!(channel, "app" | "portal") {
                1.2
            } else {
                0.5
            }
        }
        Urgency::Low => {
            if matches!(channel, "portal" | "app") {
                1.0
            } else {
                0.3
            }
        }
    };
    if channel == "portal" && !portal_ok {
        score -= 2.5;
    }
    if user_pref == Some(channel) {
        score += 1.5;
    }
    score
}

/// Score and rank candidate channels. The sort is stable, so equal scores
/// keep the original candidate order, which itself reflects upstream
/// relevance.
pub fn recommend(
    channels: &[String],
    urgency: Urgency,
    portal_ok: bool,
    user_pref: Option<&str>,
) -> Recommendation {
    let mut scored: Vec<ChannelScore> = channels
        .iter()
        .map(|c| ChannelScore {
            channel: c.clone(),
            score: score_channel(c, urgency, portal_ok, user_pref),
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Recommendation {
        best: scored.first().map(|c| c.channel.clone()),
        backup: scored.get(1).map(|c| c.channel.clone()),
        trace: ChannelTrace {
            scored,
            portal_ok,
        },
    }
}

/// Recommender with live portal-status lookup against the `channel_status`
/// collection.
pub struct ChannelRecommender {
    store: Arc<dyn VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
}

impl ChannelRecommender {
    pub fn new(store: Arc<dyn VectorIndex>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { store, embedder }
    }

    /// The portal counts as live unless a status record for the city says
    /// otherwise. Lookup failures also read as live: an unreachable status
    /// feed must not penalize the portal.
    pub async fn portal_live(&self, city: &str) -> bool {
        let Ok(probe) = self.embedder.embed("portal status").await else {
            return true;
        };
        let filter = Filter::new()
            .must_eq("city", city)
            .must_eq("channel", "portal");
        match self
            .store
            .search(collections::CHANNEL_STATUS, DENSE_TEXT, &probe, Some(&filter), 1)
            .await
        {
            Ok(hits) => hits
                .first()
                .and_then(|h| h.payload.get("status"))
                .and_then(serde_json::Value::as_str)
                .map_or(true, |s| s == "up"),
            Err(err) => {
                tracing::debug!(error = %err, "channel status lookup failed, assuming live");
                true
            }
        }
    }

    pub async fn recommend(
        &self,
        channels: &[String],
        city: &str,
        urgency: Urgency,
        user_pref: Option<&str>,
    ) -> Recommendation {
        let portal_ok = self.portal_live(city).await;
        recommend(channels, urgency, portal_ok, user_pref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn portal_down_penalty_beats_high_urgency_base() {
        let rec = recommend(&channels(&["portal", "helpline"]), Urgency::High, false, None);
        assert_eq!(rec.best.as_deref(), Some("helpline"));
        assert_eq!(rec.backup.as_deref(), Some("portal"));

        let portal = rec.trace.scored.iter().find(|c| c.channel == "portal").unwrap();
        assert!(portal.score < 0.0);
        assert!(!rec.trace.portal_ok);
    }

    #[test]
    fn medium_urgency_prefers_app_and_portal() {
        let rec = recommend(&channels(&["helpline", "app"]), Urgency::Medium, true, None);
        assert_eq!(rec.best.as_deref(), Some("app"));
    }

    #[test]
    fn preference_bias_outweighs_one_urgency_tier() {
        // Low urgency: portal base 1.0 vs helpline 0.3 + 1.5 preference.
        let rec = recommend(
            &channels(&["portal", "helpline"]),
            Urgency::Low,
            true,
            Some("helpline"),
        );
        assert_eq!(rec.best.as_deref(), Some("helpline"));
    }

    #[test]
    fn preference_does_not_rescue_a_down_portal() {
        let rec = recommend(
            &channels(&["portal", "email"]),
            Urgency::Low,
            false,
            Some("portal"),
        );
        assert_eq!(rec.best.as_deref(), Some("email"));
    }

    #[test]
    fn deterministic_with_stable_tie_break() {
        let cands = channels(&["app", "portal"]);
        let first = recommend(&cands, Urgency::Medium, true, None);
        let second = recommend(&cands, Urgency::Medium, true, None);
        // app and portal tie at 1.2; candidate order wins.
        assert_eq!(first.best.as_deref(), Some("app"));
        assert_eq!(first.best, second.best);
        assert_eq!(first.backup, second.backup);
    }

    #[test]
    fn empty_candidate_list_yields_no_channels() {
        let rec = recommend(&[], Urgency::Low, true, None);
        assert!(rec.best.is_none());
        assert!(rec.backup.is_none());
        assert!(rec.trace.scored.is_empty());
    }

    #[test]
    fn trace_exposes_every_candidate_score() {
        let rec = recommend(&channels(&["portal", "app", "email"]), Urgency::Low, true, None);
        assert_eq!(rec.trace.scored.len(), 3);
    }
}
