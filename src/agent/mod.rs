//! Decision orchestrator.
//!
//! Composes preprocessing, user memory, hybrid retrieval, reranking, and
//! channel recommendation into the end-to-end "assist" decision, including
//! the slot-filling gate that decides between "ask more questions" and
//! "answer now". The gate is a designed, successful outcome, not an error
//! path.

use anyhow::Result as AnyResult;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::{collections, engine_collections, Filter, VectorIndex, DENSE_IMAGE};
use crate::memory::MemoryStore;
use crate::preprocess::{detect_lang, infer_urgency, redact_pii};
use crate::recommend::{ChannelRecommender, ChannelScore};
use crate::reranking::{build_reranker, Reranker};
use crate::response::{escalation_steps, fill_template, snippet};
use crate::search::HybridRetriever;
use crate::types::{Confidence, DocumentHit, Evidence, Urgency};
use crate::vision::{infer_image_hints, ImageHint};

const DEFAULT_CATEGORY: &str = "General";
const DEFAULT_DEPARTMENT: &str = "Sanitation";
const DEFAULT_SLA_DAYS: i64 = 7;
const DEFAULT_TEMPLATE: &str = "Please register a complaint for {category} at {location} near \
                                {landmark} observed on {date_time}. Attachments: {attachments}.";
/// Evidence label for image-similar case hits, distinct from the text-side
/// case search.
const IMAGE_CASE_EVIDENCE: &str = "case_library(image)";
const SAFETY_NOTE: &str = "If there is immediate danger (fire, exposed live wires, major \
                           accident risk), contact emergency services first.";

#[derive(Debug, Clone, Default)]
pub struct AssistRequest {
    pub user_id: String,
    pub text: String,
    pub city: String,
    pub ward_id: String,
    pub landmark: String,
    pub date_time: String,
    pub preferred_channel: Option<String>,
    pub tone: Option<String>,
    /// Raw encoded photo of the issue itself.
    pub issue_photo: Option<Vec<u8>>,
    /// Screenshot (portal error etc.) to run text extraction over.
    pub screenshot: Option<Vec<u8>>,
    /// Voice note to transcribe.
    pub audio: Option<Vec<u8>>,
    /// Pre-transcribed text supplied by the caller.
    pub transcript_text: Option<String>,
    /// Bypass the slot-filling gate and answer with whatever is present.
    pub auto_submit: bool,
    /// Per-request override of the prose-rendering feature flag.
    pub force_render: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inferred {
    pub category: String,
    pub department: String,
    pub urgency: Urgency,
    pub image_hints: Vec<ImageHint>,
}

/// The gate fired: input is necessarily incomplete for a sound
/// recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct InfoRequest {
    pub need_more_info: bool,
    pub missing_fields: Vec<String>,
    pub questions: Vec<String>,
    pub inferred: Inferred,
    pub evidence: Vec<Evidence>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedAction {
    pub department: String,
    pub category: String,
    pub best_channel: String,
    pub backup_channel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceableReasoning {
    pub request_id: String,
    pub kb_top: Vec<(String, f32)>,
    pub directory_top: Vec<(String, f32)>,
    pub case_text_top: Vec<(String, f32)>,
    pub case_image_top: Vec<(String, f32)>,
    pub image_hints: Vec<ImageHint>,
    pub channel_scores: Vec<ChannelScore>,
    pub portal_ok: bool,
    pub language: Option<String>,
    pub urgency: Urgency,
    pub hybrid_enabled: bool,
    pub rerank_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalDecision {
    pub need_more_info: bool,
    pub recommended_action: RecommendedAction,
    pub complaint_text: String,
    pub checklist_required_fields: Vec<String>,
    pub sla_days: i64,
    pub escalation_steps: Vec<String>,
    pub tips_from_similar_cases: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub confidence: Confidence,
    pub traceable_reasoning: TraceableReasoning,
    /// Optional prose rendering; empty when no renderer is wired or the
    /// render call failed.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rendered_markdown: String,
    pub safety_note: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Decision {
    NeedMoreInfo(InfoRequest),
    Ready(FinalDecision),
}

impl Decision {
    pub fn need_more_info(&self) -> bool {
        matches!(self, Decision::NeedMoreInfo(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcedureMatch {
    pub category: Option<String>,
    pub department: Option<String>,
    pub sla_days: Option<i64>,
    pub channels: Vec<String>,
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcedureAnswer {
    pub matches: Vec<ProcedureMatch>,
    pub evidence: Vec<Evidence>,
    pub confidence: Confidence,
}

/// Required fields with null or blank values, excluding names suffixed
/// `_optional`.
pub fn missing_fields(required: &[String], provided: &HashMap<String, String>) -> Vec<String> {
    required
        .iter()
        .filter(|f| !f.ends_with("_optional"))
        .filter(|f| provided.get(f.as_str()).map_or(true, |v| v.trim().is_empty()))
        .cloned()
        .collect()
}

/// Follow-up question per missing field.
pub fn questions_for(fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .map(|f| match f.as_str() {
            "location" => "What is the exact location (street/area) of the issue?".to_string(),
            "landmark" => "Any nearby landmark (shop/school/bus stop) to help locate it?".to_string(),
            "date_time" => "When did you first notice it (date/time)?".to_string(),
            "days_missed" => {
                "How many days has the issue continued (e.g., garbage not collected for N days)?"
                    .to_string()
            }
            "photo" => "Can you upload a clear photo of the issue?".to_string(),
            "pole_number_optional" => "If visible, what is the pole number?".to_string(),
            other => format!("Please provide: {other}"),
        })
        .collect()
}

pub struct CivicAgent {
    config: EngineConfig,
    capabilities: Capabilities,
    hybrid: HybridRetriever,
    reranker: Arc<dyn Reranker>,
    memory: MemoryStore,
    channels: ChannelRecommender,
}

impl CivicAgent {
    pub async fn new(
        store: Arc<dyn VectorIndex>,
        capabilities: Capabilities,
        config: EngineConfig,
    ) -> AnyResult<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        store.ensure_collections(&engine_collections()).await?;

        let hybrid =
            HybridRetriever::new(store.clone(), capabilities.text_embedder.clone(), &config);
        let reranker = build_reranker(&capabilities, &config);
        let memory = MemoryStore::new(
            store.clone(),
            capabilities.text_embedder.clone(),
            config.memory.clone(),
        );
        let channels = ChannelRecommender::new(store, capabilities.text_embedder.clone());

        Ok(Self {
            config,
            capabilities,
            hybrid,
            reranker,
            memory,
            channels,
        })
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Turn a complaint description into a ranked, evidence-backed decision,
    /// or a request for the missing information.
    pub async fn assist(&self, req: AssistRequest) -> Result<Decision, EngineError> {
        self.validate(&req)?;
        let request_id = Uuid::new_v4().to_string();

        // (1) Resolve language/urgency and redact each text source
        // independently before concatenation.
        let language = detect_lang(&req.text);
        let urgency = infer_urgency(&req.text);
        let mut cleaned = redact_pii(&req.text);
        for extra in self.gather_side_texts(&req).await {
            cleaned.push('\n');
            cleaned.push_str(&redact_pii(&extra));
        }

        // (2) User channel preference; decay is cheap and idempotent, so
        // every request sweeps the user's expired records first.
        if let Err(err) = self.memory.decay_cleanup(Some(&req.user_id), chrono::Utc::now()).await {
            tracing::debug!(error = %err, "memory decay sweep failed");
        }
        let stored_pref = match self.memory.get_preference(&req.user_id).await {
            Ok(pref) => pref.and_then(|p| p.pref_channel),
            Err(err) => {
                tracing::warn!(error = %err, "preference lookup failed, continuing without");
                None
            }
        };
        let user_pref = req.preferred_channel.clone().or(stored_pref);

        // (3) Image-derived signals, both best-effort.
        let (image_hints, image_hits) = self.image_signals(&req).await;
        let image_category = image_hits
            .first()
            .and_then(|h| h.payload_str("category"))
            .map(str::to_string);

        // (4) + (5) Knowledge-base search (the core path, must succeed) with
        // the directory search running concurrently; the case search waits
        // for the category derived from the KB result.
        let kb_filter = Filter::new().must_eq("city", req.city.as_str());
        let dir_filter = Filter::new()
            .must_eq("city", req.city.as_str())
            .must_eq("ward_id", req.ward_id.as_str());
        let (kb_result, dir_result) = tokio::join!(
            self.hybrid.hybrid_search(
                collections::CIVIC_KB,
                &cleaned,
                Some(&kb_filter),
                self.config.search.kb_top_k,
            ),
            self.hybrid.dense_search(
                collections::JURISDICTION_DIRECTORY,
                &cleaned,
                Some(&dir_filter),
                self.config.search.directory_top_k,
            ),
        );
        let kb_hits = kb_result.map_err(EngineError::retrieval)?;
        let kb_docs = self.reranker.rerank(&cleaned, kb_hits).await;
        let dir_hits = dir_result.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "directory search degraded to empty");
            Vec::new()
        });

        let kb_top = kb_docs.first();
        let category = kb_top
            .and_then(|h| h.payload_str("category"))
            .map(str::to_string)
            .or(image_category)
            .or_else(|| image_hints.first().map(|h| h.label.clone()))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let department = kb_top
            .and_then(|h| h.payload_str("department"))
            .unwrap_or(DEFAULT_DEPARTMENT)
            .to_string();

        let case_filter =
            (category != DEFAULT_CATEGORY).then(|| Filter::new().must_eq("category", category.as_str()));
        let case_hits = self
            .hybrid
            .dense_search(
                collections::CASE_LIBRARY,
                &cleaned,
                case_filter.as_ref(),
                self.config.search.case_top_k,
            )
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "case search degraded to empty");
                Vec::new()
            });

        // (6) Channel recommendation under live portal status.
        let candidate_channels = kb_top
            .map(|h| h.payload_str_list("channel_type"))
            .unwrap_or_default();
        let recommendation = self
            .channels
            .recommend(&candidate_channels, &req.city, urgency, user_pref.as_deref())
            .await;
        let best_channel = recommendation
            .best
            .clone()
            .unwrap_or_else(|| "helpline".to_string());
        let backup_channel = recommendation
            .backup
            .clone()
            .unwrap_or_else(|| "email".to_string());

        let confidence = Confidence::from_score(kb_top.map(DocumentHit::relevance));
        let required_fields = kb_top
            .map(|h| h.payload_str_list("required_fields"))
            .unwrap_or_default();

        // (7) Slot-filling gate.
        let provided = self.provided_fields(&req);
        let missing = missing_fields(&required_fields, &provided);
        if !missing.is_empty() && !req.auto_submit {
            tracing::info!(request_id, missing = missing.len(), "asking for more information");
            return Ok(Decision::NeedMoreInfo(InfoRequest {
                need_more_info: true,
                questions: questions_for(&missing),
                missing_fields: missing,
                inferred: Inferred {
                    category,
                    department,
                    urgency,
                    image_hints,
                },
                evidence: kb_top
                    .map(|h| vec![self.evidence_from(collections::CIVIC_KB, h)])
                    .unwrap_or_default(),
                confidence,
            }));
        }

        // (8) Final decision: template, SLA, escalation, evidence.
        let template = self
            .template_for(&category, req.tone.as_deref(), Some(&best_channel))
            .await;
        let mut fields = provided;
        fields.insert("category".to_string(), category.clone());
        fields.insert(
            "attachments".to_string(),
            if req.issue_photo.is_some() {
                "photo attached".to_string()
            } else if req.screenshot.is_some() {
                "screenshot attached".to_string()
            } else {
                "none".to_string()
            },
        );
        let complaint_text = fill_template(&template, &fields);

        let sla_days = kb_top
            .and_then(|h| h.payload_i64("sla_days"))
            .unwrap_or(DEFAULT_SLA_DAYS);

        let mut evidence = Vec::new();
        if let Some(hit) = kb_top {
            evidence.push(self.evidence_from(collections::CIVIC_KB, hit));
        }
        if let Some(hit) = dir_hits.first() {
            evidence.push(self.evidence_from(collections::JURISDICTION_DIRECTORY, hit));
        }
        if let Some(hit) = image_hits.first() {
            evidence.push(self.evidence_from(IMAGE_CASE_EVIDENCE, hit));
        }

        let tips: Vec<String> = case_hits
            .iter()
            .take(1)
            .map(|h| snippet(&h.text, self.config.limits.tip_chars))
            .collect();

        let trace = TraceableReasoning {
            request_id: request_id.clone(),
            kb_top: top_ids(&kb_docs, 5),
            directory_top: top_ids(&dir_hits, 3),
            case_text_top: top_ids(&case_hits, 3),
            case_image_top: top_ids(&image_hits, 3),
            image_hints: image_hints.clone(),
            channel_scores: recommendation.trace.scored.clone(),
            portal_ok: recommendation.trace.portal_ok,
            language,
            urgency,
            hybrid_enabled: self.config.features.enable_hybrid,
            rerank_enabled: self.config.features.enable_rerank,
        };

        // Feedback loop: the recommended channel reinforces the preference.
        if let Err(err) = self
            .memory
            .reinforce(&req.user_id, &best_channel, self.config.memory.preference_ttl_days)
            .await
        {
            tracing::warn!(error = %err, "preference reinforcement failed");
        }

        let mut decision = FinalDecision {
            need_more_info: false,
            recommended_action: RecommendedAction {
                department,
                category,
                best_channel,
                backup_channel,
            },
            complaint_text,
            checklist_required_fields: required_fields,
            sla_days,
            escalation_steps: escalation_steps(sla_days, None),
            tips_from_similar_cases: tips,
            evidence,
            confidence,
            traceable_reasoning: trace,
            rendered_markdown: String::new(),
            safety_note: SAFETY_NOTE.to_string(),
        };

        // Only a produced final decision gets a prose rendering, and only
        // best-effort: a failed render leaves the field empty.
        let render = req.force_render.unwrap_or(self.config.features.enable_render);
        if render {
            if let Some(renderer) = &self.capabilities.renderer {
                match serde_json::to_value(&decision) {
                    Ok(facts) => match renderer.render(&facts, &decision.evidence).await {
                        Ok(markdown) => decision.rendered_markdown = markdown,
                        Err(err) => tracing::warn!(error = %err, "rendering failed"),
                    },
                    Err(err) => tracing::warn!(error = %err, "decision serialization failed"),
                }
            }
        }

        tracing::info!(
            request_id,
            category = %decision.recommended_action.category,
            channel = %decision.recommended_action.best_channel,
            "decision produced"
        );
        Ok(Decision::Ready(decision))
    }

    /// Knowledge-base-only procedure lookup: "how do I get X fixed here".
    pub async fn procedure_qa(&self, city: &str, text: &str) -> Result<ProcedureAnswer, EngineError> {
        if text.trim().is_empty() || city.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "city and text are required".to_string(),
            ));
        }

        let filter = Filter::new().must_eq("city", city);
        let hits = self
            .hybrid
            .hybrid_search(collections::CIVIC_KB, text, Some(&filter), self.config.search.kb_top_k)
            .await
            .map_err(EngineError::retrieval)?;
        let docs = self.reranker.rerank(text, hits).await;

        let top = &docs[..docs.len().min(3)];
        let matches = top
            .iter()
            .map(|d| ProcedureMatch {
                category: d.payload_str("category").map(str::to_string),
                department: d.payload_str("department").map(str::to_string),
                sla_days: d.payload_i64("sla_days"),
                channels: d.payload_str_list("channel_type"),
                required_fields: d.payload_str_list("required_fields"),
            })
            .collect();
        let evidence = top
            .iter()
            .map(|d| self.evidence_from(collections::CIVIC_KB, d))
            .collect();

        Ok(ProcedureAnswer {
            matches,
            evidence,
            confidence: Confidence::from_score(top.first().map(DocumentHit::relevance)),
        })
    }

    fn validate(&self, req: &AssistRequest) -> Result<(), EngineError> {
        for (name, value) in [
            ("user_id", &req.user_id),
            ("city", &req.city),
            ("ward_id", &req.ward_id),
            ("text", &req.text),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "missing required field: {name}"
                )));
            }
        }
        if req.text.chars().count() > self.config.limits.max_text_chars {
            return Err(EngineError::InvalidInput(format!(
                "text exceeds {} characters",
                self.config.limits.max_text_chars
            )));
        }
        Ok(())
    }

    /// OCR and transcription side texts, each best-effort.
    async fn gather_side_texts(&self, req: &AssistRequest) -> Vec<String> {
        let mut texts = Vec::new();

        if self.config.features.enable_ocr {
            if let (Some(shot), Some(extractor)) =
                (&req.screenshot, &self.capabilities.text_extractor)
            {
                match extractor.extract(shot).await {
                    Ok(text) if !text.trim().is_empty() => texts.push(text),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "text extraction skipped"),
                }
            }
        }

        if let (Some(audio), Some(transcriber)) = (&req.audio, &self.capabilities.transcriber) {
            match transcriber.transcribe(audio).await {
                Ok(text) if !text.trim().is_empty() => texts.push(text),
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "transcription skipped"),
            }
        }

        if let Some(transcript) = &req.transcript_text {
            if !transcript.trim().is_empty() {
                texts.push(transcript.clone());
            }
        }

        texts
    }

    /// Image hints and image-similar cases, both empty on failure.
    async fn image_signals(&self, req: &AssistRequest) -> (Vec<ImageHint>, Vec<DocumentHit>) {
        let Some(photo) = &req.issue_photo else {
            return (Vec::new(), Vec::new());
        };

        let hints = if self.config.features.enable_image_hints {
            infer_image_hints(self.capabilities.image_classifier.as_ref(), photo, 3).await
        } else {
            Vec::new()
        };

        let hits = match self.capabilities.image_embedder.embed(photo).await {
            Ok(vector) => self
                .hybrid
                .vector_search(
                    collections::CASE_LIBRARY,
                    DENSE_IMAGE,
                    &vector,
                    None,
                    self.config.search.case_top_k,
                )
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "image case search degraded to empty");
                    Vec::new()
                }),
            Err(err) => {
                tracing::warn!(error = %err, "image embedding skipped");
                Vec::new()
            }
        };

        (hints, hits)
    }

    fn provided_fields(&self, req: &AssistRequest) -> HashMap<String, String> {
        [
            ("city", req.city.clone()),
            ("ward_id", req.ward_id.clone()),
            ("landmark", req.landmark.clone()),
            ("date_time", req.date_time.clone()),
            ("text", req.text.clone()),
            (
                "location",
                format!("Ward {}, {}", req.ward_id, req.city),
            ),
            (
                "photo",
                if req.issue_photo.is_some() {
                    "yes".to_string()
                } else {
                    String::new()
                },
            ),
            ("days_missed", String::new()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    async fn template_for(&self, category: &str, tone: Option<&str>, channel: Option<&str>) -> String {
        let filter = Filter::new().must_eq("category", category);
        let query = format!(
            "{category} complaint template {} {}",
            tone.unwrap_or(""),
            channel.unwrap_or("")
        );
        let hits = self
            .hybrid
            .dense_search(
                collections::COMPLAINT_TEMPLATES,
                &query,
                Some(&filter),
                self.config.search.template_top_k,
            )
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "template search degraded to default template");
                Vec::new()
            });
        let docs = self
            .reranker
            .rerank(&format!("{category} complaint template"), hits)
            .await;
        docs.first()
            .and_then(|d| d.payload_str("template"))
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string())
    }

    fn evidence_from(&self, collection: &str, hit: &DocumentHit) -> Evidence {
        // Directory and anonymized-case entries carry a fixed source label;
        // knowledge-base entries name their own source document.
        let default_source = match collection {
            collections::JURISDICTION_DIRECTORY => Some("directory"),
            IMAGE_CASE_EVIDENCE => Some("anonymized_case"),
            _ => None,
        };
        Evidence {
            collection: collection.to_string(),
            score: hit.relevance(),
            source: hit
                .payload_str("source")
                .or(default_source)
                .map(str::to_string),
            last_updated: hit.payload_str("last_updated").map(str::to_string),
            snippet: snippet(&hit.text, self.config.limits.snippet_chars),
        }
    }
}

fn top_ids(hits: &[DocumentHit], n: usize) -> Vec<(String, f32)> {
    hits.iter()
        .take(n)
        .map(|h| (h.id.clone(), h.relevance()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn blank_counts_as_missing_and_optional_is_skipped() {
        let provided: HashMap<String, String> = [
            ("location".to_string(), "".to_string()),
            ("photo".to_string(), "yes".to_string()),
        ]
        .into_iter()
        .collect();

        let missing = missing_fields(
            &required(&["location", "photo", "pole_number_optional"]),
            &provided,
        );
        assert_eq!(missing, vec!["location"]);
    }

    #[test]
    fn absent_field_is_missing() {
        let missing = missing_fields(&required(&["date_time"]), &HashMap::new());
        assert_eq!(missing, vec!["date_time"]);
    }

    #[test]
    fn questions_cover_known_and_unknown_fields() {
        let questions = questions_for(&required(&["location", "pipe_diameter"]));
        assert!(questions[0].contains("exact location"));
        assert_eq!(questions[1], "Please provide: pipe_diameter");
    }
}
