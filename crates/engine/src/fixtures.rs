//! Seed data for tests and local runs
//!
//! Production deployments load the knowledge-index export and the stats
//! snapshot from the external collaborators; this module carries a small
//! self-consistent slice of both so the engine can run end to end without
//! them.

use crate::tools::{KnowledgeChunk, Namespace, StatRecord};
use chrono::{DateTime, TimeZone, Utc};
use rinkside_common::auth::Scope;
use std::collections::BTreeMap;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, d, 19, 0, 0).single().unwrap_or_else(Utc::now)
}

/// Sample knowledge chunks across both namespaces
pub fn knowledge_chunks() -> Vec<KnowledgeChunk> {
    vec![
        KnowledgeChunk {
            chunk_id: "kc-0001".to_string(),
            source_id: "hockey-concepts-101".to_string(),
            namespace: Namespace::Domain,
            title: "Zone entries and offensive generation".to_string(),
            content: "Zone entries matter because controlled possession on entry \
                      roughly doubles shot generation compared to dump-ins. Teams \
                      that enter with control sustain offensive pressure longer."
                .to_string(),
            scope: Scope::Team,
            entity: None,
            fact_key: Some("mtl:zone_entry_rate".to_string()),
            claimed_value: Some(48.0),
            as_of: Some(day(1)),
        },
        KnowledgeChunk {
            chunk_id: "kc-0002".to_string(),
            source_id: "hockey-concepts-101".to_string(),
            namespace: Namespace::Domain,
            title: "Zone entries and offensive generation".to_string(),
            content: "Carry-in zone entries with controlled possession correlate \
                      with higher expected goals than uncontrolled entries."
                .to_string(),
            scope: Scope::Team,
            entity: None,
            fact_key: None,
            claimed_value: None,
            as_of: Some(day(1)),
        },
        KnowledgeChunk {
            chunk_id: "kc-0003".to_string(),
            source_id: "tactics-forecheck".to_string(),
            namespace: Namespace::Domain,
            title: "Forecheck structures".to_string(),
            content: "A 1-2-2 forecheck strategy trades pressure for neutral zone \
                      structure, forcing uncontrolled entries against."
                .to_string(),
            scope: Scope::Strategy,
            entity: None,
            fact_key: None,
            claimed_value: None,
            as_of: Some(day(2)),
        },
        KnowledgeChunk {
            chunk_id: "kc-0004".to_string(),
            source_id: "special-teams-guide".to_string(),
            namespace: Namespace::Domain,
            title: "Power play fundamentals".to_string(),
            content: "Power play efficiency depends on zone entries, formation \
                      retrievals, and shot volume from the bumper position."
                .to_string(),
            scope: Scope::Team,
            entity: None,
            fact_key: None,
            claimed_value: None,
            as_of: Some(day(2)),
        },
        KnowledgeChunk {
            chunk_id: "kc-1001".to_string(),
            source_id: "player-notes-suzuki".to_string(),
            namespace: Namespace::Entity,
            title: "Nick Suzuki scouting notes".to_string(),
            content: "Suzuki drives scoring through the middle lane; his touch \
                      around the net and vision on the half-wall anchor the top line."
                .to_string(),
            scope: Scope::Player,
            entity: Some("Nick Suzuki".to_string()),
            fact_key: None,
            claimed_value: None,
            as_of: Some(day(3)),
        },
        KnowledgeChunk {
            chunk_id: "kc-1002".to_string(),
            source_id: "player-notes-caufield".to_string(),
            namespace: Namespace::Entity,
            title: "Cole Caufield scouting notes".to_string(),
            content: "Caufield's release punishes defenders who sag off the flank; \
                      shot volume tracks his skating form."
                .to_string(),
            scope: Scope::Player,
            entity: Some("Cole Caufield".to_string()),
            fact_key: None,
            claimed_value: None,
            as_of: Some(day(3)),
        },
    ]
}

fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Sample stats snapshot rows: four games of team, player, and opponent data
pub fn stat_records() -> Vec<StatRecord> {
    let mut rows = Vec::new();

    // Team rows (scope: team)
    let team_games = [
        ("G1", 5, "TOR", 24.0, 14.0, 2.0, 5.0),
        ("G2", 8, "BOS", 28.0, 16.0, 1.0, 4.0),
        ("G3", 11, "TOR", 22.0, 13.0, 0.0, 3.0),
        ("G4", 14, "OTT", 30.0, 18.0, 2.0, 6.0),
    ];
    for (game_id, d, opp, entries, controlled, pp_goals, pp_opps) in team_games {
        rows.push(StatRecord {
            entity: "MTL".to_string(),
            game_id: game_id.to_string(),
            date: day(d),
            scope: Scope::Team,
            opponent: Some(opp.to_string()),
            values: values(&[
                ("zone_entries", entries),
                ("controlled_entries", controlled),
                ("pp_goals", pp_goals),
                ("pp_opportunities", pp_opps),
                ("goals", 3.0),
                ("shots", 31.0),
            ]),
        });
    }

    // Player rows (scope: player)
    let suzuki = [
        ("G1", 5, 1.0, 1.0, 4.0, 0.6),
        ("G2", 8, 0.0, 2.0, 3.0, 0.4),
        ("G3", 11, 1.0, 0.0, 5.0, 0.8),
        ("G4", 14, 2.0, 1.0, 6.0, 1.1),
    ];
    for (game_id, d, goals, assists, shots, xg) in suzuki {
        rows.push(StatRecord {
            entity: "Nick Suzuki".to_string(),
            game_id: game_id.to_string(),
            date: day(d),
            scope: Scope::Player,
            opponent: None,
            values: values(&[
                ("goals", goals),
                ("assists", assists),
                ("shots", shots),
                ("xg", xg),
            ]),
        });
    }

    let caufield = [
        ("G1", 5, 1.0, 0.0, 6.0, 0.9),
        ("G2", 8, 1.0, 1.0, 5.0, 0.7),
        ("G3", 11, 0.0, 0.0, 7.0, 1.0),
        ("G4", 14, 1.0, 1.0, 4.0, 0.5),
    ];
    for (game_id, d, goals, assists, shots, xg) in caufield {
        rows.push(StatRecord {
            entity: "Cole Caufield".to_string(),
            game_id: game_id.to_string(),
            date: day(d),
            scope: Scope::Player,
            opponent: None,
            values: values(&[
                ("goals", goals),
                ("assists", assists),
                ("shots", shots),
                ("xg", xg),
            ]),
        });
    }

    // Opponent rows (scope: opponent)
    let opponents = [
        ("TOR", "G1", 5, 26.0, 12.0),
        ("BOS", "G2", 8, 25.0, 15.0),
        ("TOR", "G3", 11, 27.0, 14.0),
        ("OTT", "G4", 14, 21.0, 10.0),
    ];
    for (team, game_id, d, entries, controlled) in opponents {
        rows.push(StatRecord {
            entity: team.to_string(),
            game_id: game_id.to_string(),
            date: day(d),
            scope: Scope::Opponent,
            opponent: Some("MTL".to_string()),
            values: values(&[
                ("zone_entries", entries),
                ("controlled_entries", controlled),
                ("goals", 2.0),
                ("shots", 29.0),
            ]),
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ids_are_unique() {
        let chunks = knowledge_chunks();
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_live_rate_disagrees_with_knowledge_claim() {
        // The conflict-resolution path depends on the fixture claim and the
        // computed live value actually diverging.
        let rows = stat_records();
        let (entries, controlled) = rows
            .iter()
            .filter(|r| r.entity == "MTL")
            .fold((0.0, 0.0), |(e, c), r| {
                (
                    e + r.values.get("zone_entries").copied().unwrap_or(0.0),
                    c + r.values.get("controlled_entries").copied().unwrap_or(0.0),
                )
            });
        let live = controlled / entries * 100.0;

        let claim = knowledge_chunks()
            .iter()
            .find_map(|c| c.claimed_value)
            .unwrap();
        assert!((live - claim).abs() > 1.0);
    }
}
