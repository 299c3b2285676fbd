//! Deterministic narrative template.
//!
//! Used when the provider fails non-retryably or exhausts its retries. Every
//! claim cites paths read directly off the canonical input, so the template
//! passes the grounding verifier by construction.

use crate::canonical::CanonicalInputData;
use crate::grounding::GroundingEntry;

use super::NarrativeDraft;

/// Render a minimal grounded narrative from the canonical input alone.
pub fn template_draft(
    canonical: &CanonicalInputData,
    team_state: &str,
    top_drivers: &[String],
) -> NarrativeDraft {
    let mut claims = Vec::new();

    claims.push(GroundingEntry {
        claim_text: format!(
            "Team {} ({}) was evaluated for the week starting {}.",
            canonical.team_id, canonical.org_id, canonical.week_start_iso
        ),
        sources: vec![
            "org_id".to_string(),
            "team_id".to_string(),
            "week_start_iso".to_string(),
        ],
    });

    let total_sessions: u32 = canonical.users.values().map(|u| u.session_count).sum();
    if !canonical.users.is_empty() {
        claims.push(GroundingEntry {
            claim_text: format!(
                "{} member(s) contributed {} session(s).",
                canonical.users.len(),
                total_sessions
            ),
            sources: canonical
                .users
                .keys()
                .map(|uid| format!("users.{uid}.session_count"))
                .collect(),
        });
    }

    // One claim per reported driver, citing every user-level mean that
    // feeds it.
    for driver in top_drivers {
        let sources: Vec<String> = canonical
            .users
            .iter()
            .filter(|(_, u)| u.parameters.contains_key(driver))
            .map(|(uid, _)| format!("users.{uid}.parameters.{driver}.mean"))
            .collect();
        if sources.is_empty() {
            continue;
        }
        claims.push(GroundingEntry {
            claim_text: format!("{driver} is among the week's top risk drivers."),
            sources,
        });
    }

    let driver_list = if top_drivers.is_empty() {
        "no dominant risk driver".to_string()
    } else {
        top_drivers.join(", ")
    };

    NarrativeDraft {
        narrative: format!(
            "Weekly summary for {}: overall state {}, with {}. \
             This is an automatically generated summary of the recorded survey data.",
            canonical.team_id, team_state, driver_list
        ),
        claims,
    }
}
