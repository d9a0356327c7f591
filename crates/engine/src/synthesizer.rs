//! Context Synthesizer - merges tool evidence into one cited narrative
//!
//! Builds narrative text with `[n]` citation markers linking sentences to
//! evidence items. Role adaptation is a presentation transform over one
//! shared evidence graph, driven by a single role-to-policy table. When a
//! knowledge claim and a live metric disagree on the same fact, the live
//! value wins and the discrepancy is recorded as a warning, never dropped.

use crate::types::{
    AnalyticsPayload, EvidenceItem, EvidenceKind, Intent, InvocationStatus, ResponseStatus,
    SynthesizedResponse, ToolInvocation,
};
use rinkside_common::auth::{UserContext, UserRole};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Two values this far apart describe different facts
const CONFLICT_EPSILON: f64 = 0.5;

/// Presentation policy for one role
#[derive(Debug, Clone, Copy)]
pub struct PresentationPolicy {
    /// Narrative lead-in
    pub opening: &'static str,

    /// Framing noun used when summing up
    pub focus: &'static str,

    /// Spell out per-game detail for number-heavy readers
    pub detailed_numbers: bool,
}

/// The role-to-presentation table. One table, consulted only here.
pub fn policy_for(role: UserRole) -> PresentationPolicy {
    match role {
        UserRole::Coach => PresentationPolicy {
            opening: "From a game-planning view",
            focus: "matchup and deployment decisions",
            detailed_numbers: false,
        },
        UserRole::Player => PresentationPolicy {
            opening: "For your own development",
            focus: "where your game is trending",
            detailed_numbers: false,
        },
        UserRole::Analyst => PresentationPolicy {
            opening: "From a statistical perspective",
            focus: "the underlying distributions",
            detailed_numbers: true,
        },
        UserRole::Scout => PresentationPolicy {
            opening: "From an evaluation standpoint",
            focus: "projection and fit",
            detailed_numbers: true,
        },
        UserRole::Staff => PresentationPolicy {
            opening: "At an operational level",
            focus: "the team picture",
            detailed_numbers: false,
        },
    }
}

pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Build the clarification response for an ambiguous intent.
    /// No tools were called; there is nothing to cite.
    pub fn clarification(&self, intent: &Intent) -> SynthesizedResponse {
        SynthesizedResponse {
            narrative: "I need a little more to answer that precisely. Did you mean one of the \
                        following?"
                .to_string(),
            evidence: Vec::new(),
            analytics: Vec::new(),
            warnings: Vec::new(),
            status: ResponseStatus::ClarificationNeeded,
            clarification_candidates: intent.candidates.clone(),
        }
    }

    /// Merge terminal invocations into one cited response
    pub fn synthesize(
        &self,
        intent: &Intent,
        invocations: &[ToolInvocation],
        user: &UserContext,
    ) -> SynthesizedResponse {
        let policy = policy_for(user.role);
        let mut warnings = Vec::new();
        let mut degraded = false;

        // Collect the shared evidence graph from successful invocations
        let mut evidence: Vec<EvidenceItem> = Vec::new();
        let mut analytics: Vec<AnalyticsPayload> = Vec::new();
        for inv in invocations {
            if !inv.status.is_success() {
                degraded = true;
                warnings.push(format!(
                    "{} was unavailable ({}); the answer may be missing that source",
                    inv.tool_id,
                    inv.error.as_deref().unwrap_or("no result")
                ));
                continue;
            }
            if let Some(output) = &inv.result {
                if output.truncated {
                    degraded = true;
                    warnings.push(format!(
                        "{} hit its scan guard after {} rows; figures cover the scanned portion only",
                        inv.tool_id,
                        output.rows_scanned.unwrap_or(0)
                    ));
                }
                evidence.extend(output.evidence.iter().cloned());
                analytics.extend(output.analytics.iter().cloned());
            }
        }

        let superseded = self.resolve_conflicts(&evidence, &mut warnings);

        if evidence.is_empty() {
            let status = if degraded {
                ResponseStatus::Partial
            } else {
                ResponseStatus::Error
            };
            return SynthesizedResponse {
                narrative: "No supporting evidence was available for that question, so I \
                            can't give you a grounded answer."
                    .to_string(),
                evidence,
                analytics,
                warnings,
                status,
                clarification_candidates: Vec::new(),
            };
        }

        let narrative = self.compose_narrative(intent, &evidence, &superseded, &policy);

        let status = if degraded {
            ResponseStatus::Partial
        } else {
            ResponseStatus::Answered
        };

        SynthesizedResponse {
            narrative,
            evidence,
            analytics,
            warnings,
            status,
            clarification_candidates: Vec::new(),
        }
    }

    /// Detect conflicting claims on the same fact. Returns the evidence ids
    /// whose values lost and must not drive the narrative.
    fn resolve_conflicts(
        &self,
        evidence: &[EvidenceItem],
        warnings: &mut Vec<String>,
    ) -> HashSet<Uuid> {
        let mut superseded = HashSet::new();

        let mut by_fact: BTreeMap<&str, Vec<&EvidenceItem>> = BTreeMap::new();
        for item in evidence {
            if let (Some(key), Some(_)) = (&item.fact_key, item.value) {
                by_fact.entry(key.as_str()).or_default().push(item);
            }
        }

        for (key, items) in by_fact {
            let metrics: Vec<&&EvidenceItem> = items
                .iter()
                .filter(|i| i.kind == EvidenceKind::Metric)
                .collect();
            let knowledge: Vec<&&EvidenceItem> = items
                .iter()
                .filter(|i| i.kind == EvidenceKind::Knowledge)
                .collect();

            // Knowledge vs live: the live value always wins
            if let Some(live) = metrics.first() {
                for k in &knowledge {
                    let (Some(claimed), Some(current)) = (k.value, live.value) else {
                        continue;
                    };
                    if (claimed - current).abs() > CONFLICT_EPSILON {
                        superseded.insert(k.id);
                        warnings.push(format!(
                            "live value {:.1} for {} disagrees with \"{}\" which claims {:.1}; \
                             the live value is used",
                            current, key, k.citation, claimed
                        ));
                    }
                }
            }

            // Live vs live: the most recent as_of wins; a tie keeps both
            if metrics.len() > 1 {
                let newest = metrics
                    .iter()
                    .max_by_key(|i| i.as_of)
                    .map(|i| (i.id, i.as_of));
                if let Some((winner_id, winner_as_of)) = newest {
                    for m in &metrics {
                        if m.id == winner_id {
                            continue;
                        }
                        let (Some(a), Some(b)) = (
                            m.value,
                            metrics.iter().find(|x| x.id == winner_id).and_then(|x| x.value),
                        ) else {
                            continue;
                        };
                        if (a - b).abs() <= CONFLICT_EPSILON {
                            continue;
                        }
                        if m.as_of == winner_as_of {
                            warnings.push(format!(
                                "two live sources disagree on {} ({:.1} vs {:.1}) with equal \
                                 recency; both are reported",
                                key, a, b
                            ));
                        } else {
                            superseded.insert(m.id);
                            warnings.push(format!(
                                "older live value {:.1} for {} superseded by more recent {:.1}",
                                a, key, b
                            ));
                        }
                    }
                }
            }
        }

        superseded
    }

    /// Compose the narrative with citation markers. Marker `[n]` is the
    /// 1-based index of the item in the evidence list.
    fn compose_narrative(
        &self,
        intent: &Intent,
        evidence: &[EvidenceItem],
        superseded: &HashSet<Uuid>,
        policy: &PresentationPolicy,
    ) -> String {
        let mut sentences: Vec<String> = Vec::new();
        sentences.push(format!(
            "{}, here is what the evidence shows on your {} question.",
            policy.opening, intent.category
        ));

        // Live numbers lead; context follows
        for (idx, item) in evidence.iter().enumerate() {
            if item.kind != EvidenceKind::Metric || superseded.contains(&item.id) {
                continue;
            }
            let marker = idx + 1;
            if policy.detailed_numbers {
                let as_of = item
                    .as_of
                    .map(|d| format!(" as of {}", d.format("%Y-%m-%d")))
                    .unwrap_or_default();
                sentences.push(format!("{}{} [{}].", item.content, as_of, marker));
            } else {
                sentences.push(format!("{} [{}].", item.content, marker));
            }
        }

        for (idx, item) in evidence.iter().enumerate() {
            if item.kind != EvidenceKind::Knowledge {
                continue;
            }
            let marker = idx + 1;
            if superseded.contains(&item.id) {
                sentences.push(format!(
                    "Background from {} applies, though its figures are older than the live \
                     number above [{}].",
                    item.citation, marker
                ));
            } else {
                sentences.push(format!("{} [{}].", item.content.trim(), marker));
            }
        }

        sentences.push(format!(
            "Taken together, that is the picture for {}.",
            policy.focus
        ));
        sentences.join(" ")
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Citation markers referenced by a narrative, in order of appearance
pub fn extract_citation_markers(narrative: &str) -> Vec<usize> {
    let pattern = regex_lite::Regex::new(r"\[(\d+)\]").expect("static pattern");
    pattern
        .captures_iter(narrative)
        .filter_map(|cap| cap.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolId, ToolInvocation, ToolOutput};
    use chrono::{TimeZone, Utc};
    use rinkside_common::auth::Scope;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn intent() -> Intent {
        Intent {
            category: crate::types::IntentCategory::Lookup,
            text: "test".to_string(),
            entities: BTreeMap::new(),
            confidence: 0.8,
            candidates: Vec::new(),
            wants_context: true,
            wants_live: true,
        }
    }

    fn evidence(kind: EvidenceKind, fact_key: Option<&str>, value: Option<f64>) -> EvidenceItem {
        EvidenceItem {
            id: Uuid::new_v4(),
            kind,
            citation: match kind {
                EvidenceKind::Knowledge => "Concepts guide (doc-1)".to_string(),
                EvidenceKind::Metric => "team analytics store: points (4 games)".to_string(),
            },
            source_id: "src".to_string(),
            content: match kind {
                EvidenceKind::Knowledge => "Controlled entries drive shot generation".to_string(),
                EvidenceKind::Metric => "MTL zone_entry_rate of 58.7 across 4 games".to_string(),
            },
            value,
            fact_key: fact_key.map(String::from),
            confidence: 0.9,
            source_scope: Scope::Team,
            as_of: Some(Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap()),
        }
    }

    fn ok_invocation(tool: ToolId, items: Vec<EvidenceItem>) -> ToolInvocation {
        let mut inv = ToolInvocation::new(tool, json!({}), false);
        inv.status = InvocationStatus::Ok;
        inv.result = Some(ToolOutput {
            evidence: items,
            ..Default::default()
        });
        inv
    }

    fn failed_invocation(tool: ToolId, status: InvocationStatus) -> ToolInvocation {
        let mut inv = ToolInvocation::new(tool, json!({}), false);
        inv.status = status;
        inv.error = Some("timed out after 800ms".to_string());
        inv
    }

    fn user() -> UserContext {
        UserContext::for_role("u1", UserRole::Coach)
    }

    #[test]
    fn test_hybrid_response_cites_both_kinds() {
        let invocations = vec![
            ok_invocation(
                ToolId::KnowledgeSearch,
                vec![evidence(EvidenceKind::Knowledge, None, None)],
            ),
            ok_invocation(
                ToolId::StructuredQuery,
                vec![evidence(EvidenceKind::Metric, Some("mtl:rate"), Some(58.7))],
            ),
        ];

        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        assert_eq!(response.status, ResponseStatus::Answered);
        assert_eq!(response.evidence.len(), 2);
        let markers = extract_citation_markers(&response.narrative);
        assert!(markers.contains(&1));
        assert!(markers.contains(&2));
    }

    #[test]
    fn test_conflict_prefers_live_value() {
        let invocations = vec![
            ok_invocation(
                ToolId::KnowledgeSearch,
                vec![evidence(
                    EvidenceKind::Knowledge,
                    Some("mtl:zone_entry_rate"),
                    Some(48.0),
                )],
            ),
            ok_invocation(
                ToolId::StructuredQuery,
                vec![evidence(
                    EvidenceKind::Metric,
                    Some("mtl:zone_entry_rate"),
                    Some(58.7),
                )],
            ),
        ];

        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        // Live value in the narrative, discrepancy recorded, nothing dropped
        assert!(response.narrative.contains("58.7"));
        assert!(!response.narrative.contains("48.0"));
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("48.0"));
        assert_eq!(response.evidence.len(), 2);
        assert_eq!(response.status, ResponseStatus::Answered);
    }

    #[test]
    fn test_missing_source_degrades_to_partial() {
        let invocations = vec![
            failed_invocation(ToolId::KnowledgeSearch, InvocationStatus::Timeout),
            ok_invocation(
                ToolId::StructuredQuery,
                vec![evidence(EvidenceKind::Metric, Some("k"), Some(1.0))],
            ),
        ];

        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("knowledge_search")));
    }

    #[test]
    fn test_truncated_result_degrades_to_partial() {
        let mut inv = ok_invocation(
            ToolId::StructuredQuery,
            vec![evidence(EvidenceKind::Metric, Some("k"), Some(1.0))],
        );
        if let Some(output) = inv.result.as_mut() {
            output.truncated = true;
            output.rows_scanned = Some(10_000);
        }

        let response = Synthesizer::new().synthesize(&intent(), &[inv], &user());

        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(response.warnings.iter().any(|w| w.contains("10000")));
    }

    #[test]
    fn test_role_framing_shares_one_evidence_graph() {
        let invocations = vec![ok_invocation(
            ToolId::StructuredQuery,
            vec![evidence(EvidenceKind::Metric, Some("k"), Some(1.0))],
        )];
        let synthesizer = Synthesizer::new();

        let coach = synthesizer.synthesize(
            &intent(),
            &invocations,
            &UserContext::for_role("c", UserRole::Coach),
        );
        let analyst = synthesizer.synthesize(
            &intent(),
            &invocations,
            &UserContext::for_role("a", UserRole::Analyst),
        );

        assert_ne!(coach.narrative, analyst.narrative);
        assert!(coach.narrative.starts_with("From a game-planning view"));
        assert!(analyst.narrative.starts_with("From a statistical perspective"));

        // Same evidence either way; only the presentation differs
        let coach_ids: Vec<_> = coach.evidence.iter().map(|e| e.source_id.clone()).collect();
        let analyst_ids: Vec<_> = analyst.evidence.iter().map(|e| e.source_id.clone()).collect();
        assert_eq!(coach_ids, analyst_ids);
    }

    #[test]
    fn test_live_vs_live_most_recent_wins() {
        let mut older = evidence(EvidenceKind::Metric, Some("k"), Some(10.0));
        older.as_of = Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        let newer = evidence(EvidenceKind::Metric, Some("k"), Some(12.0));

        let invocations = vec![ok_invocation(ToolId::StructuredQuery, vec![older, newer])];
        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("superseded")));
    }

    #[test]
    fn test_no_evidence_never_reads_confident() {
        let invocations = vec![failed_invocation(
            ToolId::StructuredQuery,
            InvocationStatus::Error,
        )];
        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(extract_citation_markers(&response.narrative).is_empty());
    }

    #[test]
    fn test_markers_stay_within_evidence_range() {
        let invocations = vec![
            ok_invocation(
                ToolId::KnowledgeSearch,
                vec![
                    evidence(EvidenceKind::Knowledge, None, None),
                    evidence(EvidenceKind::Knowledge, None, None),
                ],
            ),
            ok_invocation(
                ToolId::StructuredQuery,
                vec![evidence(EvidenceKind::Metric, Some("k"), Some(3.0))],
            ),
        ];
        let response = Synthesizer::new().synthesize(&intent(), &invocations, &user());

        let markers = extract_citation_markers(&response.narrative);
        assert!(!markers.is_empty());
        assert!(markers.iter().all(|m| *m >= 1 && *m <= response.evidence.len()));
    }
}
