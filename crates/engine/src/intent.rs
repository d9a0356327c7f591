//! Intent Classifier - Understands user questions and extracts slots
//!
//! Provides:
//! - Intent category detection (lookup, comparison, trend, ...)
//! - Slot extraction (players, teams, opponents, metrics, date ranges)
//! - Confidence scoring with a clarification fallback
//!
//! The classifier is pure: it reads the query text plus a bounded history
//! window and mutates nothing.

use crate::history::Turn;
use crate::types::{Intent, IntentCategory};
use std::collections::BTreeMap;

/// Classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Confidence below this falls back to clarification
    pub clarification_threshold: f32,

    /// Conversation turns visible for pronoun resolution
    pub history_window: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            clarification_threshold: 0.45,
            history_window: 6,
        }
    }
}

/// Heuristic intent classifier
pub struct IntentClassifier {
    config: ClassifierConfig,

    /// Known player aliases (lowercased alias -> canonical name)
    players: Vec<(&'static str, &'static str)>,

    /// Known team aliases (lowercased alias -> tricode)
    teams: Vec<(&'static str, &'static str)>,

    /// Known metric aliases (lowercased phrase -> metric key)
    metrics: Vec<(&'static str, &'static str)>,

    /// Opponents offered as candidates when one cannot be resolved
    recent_opponents: Vec<(&'static str, &'static str)>,
}

impl IntentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            players: Self::player_aliases(),
            teams: Self::team_aliases(),
            metrics: Self::metric_aliases(),
            recent_opponents: vec![
                ("Toronto", "TOR"),
                ("Boston", "BOS"),
                ("Ottawa", "OTT"),
            ],
        }
    }

    /// Classify a query, resolving pronouns against the history window
    pub fn classify(&self, text: &str, history: &[Turn]) -> Intent {
        let normalized = text.trim().to_lowercase();

        let mut category = self.detect_category(&normalized);
        let wants_context = self.wants_context(&normalized);
        let wants_live = self.wants_live(&normalized);

        let mut entities = self.extract_entities(&normalized);

        // Unresolved opponent reference: try the bounded history window,
        // newest turns first.
        let references_opponent = self.references_opponent(&normalized);
        if references_opponent && !entities.contains_key("opponent") {
            if let Some(tricode) = self.opponent_from_history(history) {
                entities.insert("opponent".to_string(), tricode);
            }
        }

        let unresolved_opponent = references_opponent && !entities.contains_key("opponent");
        let confidence = self.calculate_confidence(
            category,
            &entities,
            wants_context,
            wants_live,
            unresolved_opponent,
        );

        let mut candidates = Vec::new();
        if confidence < self.config.clarification_threshold {
            category = IntentCategory::Ambiguous;
            candidates = self.build_candidates(&normalized, unresolved_opponent);
        }

        Intent {
            category,
            text: normalized,
            entities,
            confidence,
            candidates,
            wants_context,
            wants_live,
        }
    }

    /// Detect intent category using keyword heuristics
    fn detect_category(&self, query: &str) -> IntentCategory {
        // Comparison patterns
        if query.contains(" vs ")
            || query.contains(" versus ")
            || query.contains("compare")
            || query.contains("difference between")
            || query.contains("against")
            || query.contains("matchup")
        {
            return IntentCategory::Comparison;
        }

        // Visualization patterns
        if query.contains("chart")
            || query.contains("plot")
            || query.contains("graph")
            || query.contains("heatmap")
            || query.contains("visualize")
            || query.contains("show me a")
        {
            return IntentCategory::Visualization;
        }

        // Trend patterns
        if query.contains("trend")
            || query.contains("over time")
            || query.contains("over the last")
            || query.contains("improving")
            || query.contains("progression")
            || query.contains("since ")
        {
            return IntentCategory::Trend;
        }

        // Prediction patterns
        if query.contains("predict")
            || query.contains("will ")
            || query.contains("likely")
            || query.contains("projection")
            || query.contains("on pace")
        {
            return IntentCategory::Prediction;
        }

        IntentCategory::Lookup
    }

    /// Does the question ask for explanation or background?
    fn wants_context(&self, query: &str) -> bool {
        query.contains("explain")
            || query.contains("why ")
            || query.starts_with("why")
            || query.contains("what does")
            || query.contains("matter")
            || query.contains("mean")
            || query.contains("how does")
            || query.contains("rule")
            || query.contains("concept")
    }

    /// Does the question ask for current numbers?
    fn wants_live(&self, query: &str) -> bool {
        query.contains("current")
            || query.contains("this season")
            || query.contains("so far")
            || query.contains("total")
            || query.contains("rate")
            || query.contains("how many")
            || query.contains("stats")
            || query.contains("numbers")
            || query.contains("per game")
            || self.metrics.iter().any(|(alias, _)| query.contains(alias))
    }

    /// Does the query reference an opponent at all (named or pronoun)?
    fn references_opponent(&self, query: &str) -> bool {
        query.contains("against")
            || query.contains(" vs ")
            || query.contains(" versus ")
            || query.contains("matchup")
    }

    /// Extract slot values from the normalized query
    fn extract_entities(&self, query: &str) -> BTreeMap<String, String> {
        let mut entities = BTreeMap::new();

        for (alias, canonical) in &self.players {
            if query.contains(alias) {
                entities.insert("player".to_string(), canonical.to_string());
                break;
            }
        }

        for (alias, tricode) in &self.teams {
            if query.contains(alias) {
                // A team named after "against"/"vs" is the opponent
                let slot = if self.is_opponent_mention(query, alias) {
                    "opponent"
                } else {
                    "team"
                };
                entities.entry(slot.to_string()).or_insert(tricode.to_string());
            }
        }

        for (alias, key) in &self.metrics {
            if query.contains(alias) {
                entities.insert("metric".to_string(), key.to_string());
                break;
            }
        }

        if let Some(range) = self.extract_date_range(query) {
            entities.insert("date_range".to_string(), range);
        }

        entities
    }

    fn is_opponent_mention(&self, query: &str, alias: &str) -> bool {
        for marker in ["against ", "vs ", "versus "] {
            if let Some(pos) = query.find(marker) {
                if query[pos..].contains(alias) {
                    return true;
                }
            }
        }
        false
    }

    fn extract_date_range(&self, query: &str) -> Option<String> {
        if query.contains("this season") {
            return Some("season".to_string());
        }
        // "last N games"
        if let Some(pos) = query.find("last ") {
            let rest = &query[pos + 5..];
            let count: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !count.is_empty() && rest[count.len()..].trim_start().starts_with("game") {
                return Some(format!("last_{}_games", count));
            }
        }
        if query.contains("this month") {
            return Some("month".to_string());
        }
        None
    }

    /// Resolve an opponent from recent turns, newest first
    fn opponent_from_history(&self, history: &[Turn]) -> Option<String> {
        for turn in history.iter().rev().take(self.config.history_window) {
            let text = turn.text.to_lowercase();
            for (alias, tricode) in &self.teams {
                if text.contains(alias) {
                    return Some(tricode.to_string());
                }
            }
        }
        None
    }

    /// Confidence from category cues and slot resolution quality
    fn calculate_confidence(
        &self,
        category: IntentCategory,
        entities: &BTreeMap<String, String>,
        wants_context: bool,
        wants_live: bool,
        unresolved_opponent: bool,
    ) -> f32 {
        // An opponent the query needs but we cannot name dominates
        // everything else: guessing would route the wrong comparison.
        if unresolved_opponent {
            return 0.30;
        }

        let category_conf = match category {
            IntentCategory::Lookup => 0.6,
            _ => 0.8,
        };

        let mut slot_conf: f32 = 0.4;
        if entities.contains_key("player") || entities.contains_key("team") {
            slot_conf += 0.25;
        }
        if entities.contains_key("metric") {
            slot_conf += 0.25;
        }
        if entities.contains_key("date_range") {
            slot_conf += 0.1;
        }

        let mut confidence = (category_conf + slot_conf.min(1.0)) / 2.0;

        // A clear ask (context or numbers) with no slots at all is vague
        if entities.is_empty() && !wants_context && !wants_live {
            confidence -= 0.2;
        }

        confidence.clamp(0.0, 1.0)
    }

    /// Ranked candidate interpretations for a clarification response
    fn build_candidates(&self, query: &str, unresolved_opponent: bool) -> Vec<String> {
        if unresolved_opponent {
            return self
                .recent_opponents
                .iter()
                .take(3)
                .map(|(name, tricode)| {
                    format!("Did you mean our games against {} ({})?", name, tricode)
                })
                .collect();
        }

        let mut candidates = vec![
            "Ask about a specific player's current stats, e.g. \"Nick Suzuki's point total\"."
                .to_string(),
            "Ask about team performance, e.g. \"our zone entry rate this season\".".to_string(),
        ];
        if query.split_whitespace().count() <= 3 {
            candidates.push(
                "Ask for background on a concept, e.g. \"explain why zone entries matter\"."
                    .to_string(),
            );
        }
        candidates.truncate(3);
        candidates
    }

    fn player_aliases() -> Vec<(&'static str, &'static str)> {
        vec![
            ("suzuki", "Nick Suzuki"),
            ("caufield", "Cole Caufield"),
            ("slafkovsky", "Juraj Slafkovsky"),
            ("hutson", "Lane Hutson"),
            ("guhle", "Kaiden Guhle"),
            ("montembeault", "Samuel Montembeault"),
            ("dach", "Kirby Dach"),
        ]
    }

    fn team_aliases() -> Vec<(&'static str, &'static str)> {
        vec![
            ("toronto", "TOR"),
            ("leafs", "TOR"),
            ("boston", "BOS"),
            ("bruins", "BOS"),
            ("ottawa", "OTT"),
            ("senators", "OTT"),
            ("tampa", "TBL"),
            ("lightning", "TBL"),
        ]
    }

    fn metric_aliases() -> Vec<(&'static str, &'static str)> {
        vec![
            ("point total", "points"),
            ("points", "points"),
            ("goals per game", "goals_per_game"),
            ("goals", "goals"),
            ("assists", "assists"),
            ("zone entries", "zone_entry_rate"),
            ("zone entry", "zone_entry_rate"),
            ("shots", "shots"),
            ("save percentage", "save_pct"),
            ("power play", "powerplay_pct"),
            ("expected goals", "expected_goals"),
            ("xg", "expected_goals"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Speaker, Turn};
    use chrono::Utc;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(ClassifierConfig::default())
    }

    fn turn(text: &str) -> Turn {
        Turn {
            speaker: Speaker::User,
            text: text.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_live_lookup() {
        let intent = classifier().classify("What is Suzuki's current point total?", &[]);

        assert_eq!(intent.category, IntentCategory::Lookup);
        assert_eq!(intent.entities.get("player").unwrap(), "Nick Suzuki");
        assert_eq!(intent.entities.get("metric").unwrap(), "points");
        assert!(intent.wants_live);
        assert!(!intent.wants_context);
        assert!(intent.confidence >= 0.45);
    }

    #[test]
    fn test_hybrid_explain_and_show() {
        let intent =
            classifier().classify("Explain why zone entries matter and show our current rate", &[]);

        assert!(intent.wants_context);
        assert!(intent.wants_live);
        assert_eq!(intent.entities.get("metric").unwrap(), "zone_entry_rate");
        assert_ne!(intent.category, IntentCategory::Ambiguous);
    }

    #[test]
    fn test_unresolved_opponent_is_ambiguous() {
        let intent = classifier().classify("How did we do against them?", &[]);

        assert_eq!(intent.category, IntentCategory::Ambiguous);
        assert!(intent.confidence < 0.45);
        assert!(intent.candidates.len() >= 2 && intent.candidates.len() <= 3);
        assert!(intent.candidates[0].contains("TOR"));
    }

    #[test]
    fn test_opponent_resolved_from_history() {
        let history = vec![turn("What was the score in the Boston game?")];
        let intent = classifier().classify("How did we do against them?", &history);

        assert_eq!(intent.category, IntentCategory::Comparison);
        assert_eq!(intent.entities.get("opponent").unwrap(), "BOS");
    }

    #[test]
    fn test_named_opponent() {
        let intent = classifier().classify("Compare our power play against Toronto", &[]);

        assert_eq!(intent.category, IntentCategory::Comparison);
        assert_eq!(intent.entities.get("opponent").unwrap(), "TOR");
    }

    #[test]
    fn test_trend_with_date_range() {
        let intent = classifier().classify("Caufield goals over the last 10 games", &[]);

        assert_eq!(intent.category, IntentCategory::Trend);
        assert_eq!(intent.entities.get("date_range").unwrap(), "last_10_games");
    }

    #[test]
    fn test_visualization() {
        let intent = classifier().classify("Show me a chart of shots this season", &[]);
        assert_eq!(intent.category, IntentCategory::Visualization);
    }

    #[test]
    fn test_history_window_is_bounded() {
        // The opponent mention sits beyond the window and must not resolve
        let mut history: Vec<Turn> = vec![turn("Boston looked slow in that game")];
        for _ in 0..8 {
            history.push(turn("unrelated follow-up"));
        }
        let intent = classifier().classify("How did we do against them?", &history);

        assert_eq!(intent.category, IntentCategory::Ambiguous);
    }
}
