//! Router - maps a classified intent onto a tool plan
//!
//! The router only builds the plan; it performs no I/O. Policy:
//! numeric/current-state questions pull from the structured engine,
//! explanatory questions pull from knowledge search, and comparison /
//! trend / prediction questions pull from both. When both apply, knowledge
//! search is placed first in the plan so it starts first, but it carries no
//! dependency edge; the two run concurrently and only the synthesizer
//! joins on both.

use crate::tools::{KnowledgeParams, Namespace, QueryMode, StructuredParams};
use crate::types::{Intent, IntentCategory, ToolId, ToolInvocation};
use rinkside_common::auth::{Scope, UserContext};
use rinkside_common::config::OrchestratorConfig;
use rinkside_common::errors::{EngineError, Result};

/// Tricode the snapshot publishes the home side under
const HOME_TEAM: &str = "MTL";

/// The per-query dependency graph of tool invocations
#[derive(Debug, Clone)]
pub struct ToolPlan {
    pub category: IntentCategory,
    pub invocations: Vec<ToolInvocation>,
}

impl ToolPlan {
    pub fn tools(&self) -> Vec<ToolId> {
        self.invocations.iter().map(|i| i.tool_id).collect()
    }
}

/// Plan builder
pub struct Router {
    config: OrchestratorConfig,
}

impl Router {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// Build the tool plan for a classified intent
    pub fn route(&self, intent: &Intent, user: &UserContext) -> Result<ToolPlan> {
        if intent.category == IntentCategory::Ambiguous {
            return Err(EngineError::ClarificationNeeded {
                candidates: intent.candidates.clone(),
            });
        }

        self.check_slot_permissions(intent, user)?;

        let category = intent.category.as_str();
        let mut invocations = Vec::new();

        // Knowledge search seeds context, so it goes first in plan order
        if self.needs_knowledge(intent) {
            let params = self.knowledge_params(intent);
            let required = self.config.is_required(category, ToolId::KnowledgeSearch.as_str());
            invocations.push(ToolInvocation::new(
                ToolId::KnowledgeSearch,
                serde_json::to_value(params)?,
                required,
            ));
        }

        if self.needs_structured(intent) {
            let required = self.config.is_required(category, ToolId::StructuredQuery.as_str());
            match intent.category {
                IntentCategory::Comparison => {
                    // Own side and opponent side run concurrently
                    invocations.push(ToolInvocation::new(
                        ToolId::StructuredQuery,
                        serde_json::to_value(self.structured_params(
                            intent,
                            intent.entities.get("player").cloned(),
                            QueryMode::Aggregate,
                        ))?,
                        required,
                    ));
                    if let Some(opponent) = intent.entities.get("opponent") {
                        invocations.push(ToolInvocation::new(
                            ToolId::StructuredQuery,
                            serde_json::to_value(self.structured_params(
                                intent,
                                Some(opponent.clone()),
                                QueryMode::Aggregate,
                            ))?,
                            required,
                        ));
                    }
                }
                IntentCategory::Trend => {
                    invocations.push(ToolInvocation::new(
                        ToolId::StructuredQuery,
                        serde_json::to_value(self.structured_params(
                            intent,
                            intent.entities.get("player").cloned(),
                            QueryMode::Series,
                        ))?,
                        required,
                    ));
                }
                IntentCategory::Visualization => {
                    // The chart series keys off the summary's coverage, so
                    // it waits for the summary to land.
                    let summary = ToolInvocation::new(
                        ToolId::StructuredQuery,
                        serde_json::to_value(self.structured_params(
                            intent,
                            intent.entities.get("player").cloned(),
                            QueryMode::Aggregate,
                        ))?,
                        required,
                    );
                    let summary_id = summary.id;
                    invocations.push(summary);
                    invocations.push(
                        ToolInvocation::new(
                            ToolId::StructuredQuery,
                            serde_json::to_value(self.structured_params(
                                intent,
                                intent.entities.get("player").cloned(),
                                QueryMode::Series,
                            ))?,
                            false,
                        )
                        .depends_on(summary_id),
                    );
                }
                _ => {
                    invocations.push(ToolInvocation::new(
                        ToolId::StructuredQuery,
                        serde_json::to_value(self.structured_params(
                            intent,
                            intent.entities.get("player").cloned(),
                            QueryMode::Aggregate,
                        ))?,
                        required,
                    ));
                }
            }
        }

        if invocations.is_empty() {
            // Nothing routable: surface it instead of synthesizing from air
            return Err(EngineError::Validation {
                message: "query resolves to no data source".to_string(),
                field: None,
            });
        }

        Ok(ToolPlan {
            category: intent.category,
            invocations,
        })
    }

    /// Slot-level permission pre-check: fatal before any tool runs
    fn check_slot_permissions(&self, intent: &Intent, user: &UserContext) -> Result<()> {
        if intent.entities.contains_key("opponent") {
            user.require_scope(Scope::Opponent)?;
        }
        if intent.entities.contains_key("player") {
            user.require_scope(Scope::Player)?;
        }
        Ok(())
    }

    fn needs_knowledge(&self, intent: &Intent) -> bool {
        match intent.category {
            IntentCategory::Comparison | IntentCategory::Trend | IntentCategory::Prediction => true,
            IntentCategory::Visualization => false,
            IntentCategory::Lookup => intent.wants_context,
            IntentCategory::Ambiguous => false,
        }
    }

    fn needs_structured(&self, intent: &Intent) -> bool {
        match intent.category {
            IntentCategory::Comparison
            | IntentCategory::Trend
            | IntentCategory::Prediction
            | IntentCategory::Visualization => true,
            IntentCategory::Lookup => intent.wants_live || !intent.wants_context,
            IntentCategory::Ambiguous => false,
        }
    }

    fn knowledge_params(&self, intent: &Intent) -> KnowledgeParams {
        // Entity-specific context when the question names someone;
        // general domain knowledge otherwise.
        match intent.entities.get("player") {
            Some(player) => KnowledgeParams {
                text: intent.text.clone(),
                namespace: Namespace::Entity,
                entity: Some(player.clone()),
            },
            None => KnowledgeParams {
                text: intent.text.clone(),
                namespace: Namespace::Domain,
                entity: None,
            },
        }
    }

    fn structured_params(
        &self,
        intent: &Intent,
        entity: Option<String>,
        mode: QueryMode,
    ) -> StructuredParams {
        let metric = intent
            .entities
            .get("metric")
            .cloned()
            .unwrap_or_else(|| "points".to_string());
        StructuredParams {
            metric,
            // Questions that name nobody are about the home team
            entity: entity.or_else(|| Some(HOME_TEAM.to_string())),
            opponent: None,
            date_range: intent.entities.get("date_range").cloned(),
            mode,
        }
    }
}
