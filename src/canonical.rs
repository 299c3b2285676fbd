//! Canonical input serialization and the idempotency hash.
//!
//! One weekly row is driven by exactly one `CanonicalInputData`. Its JSON
//! form has recursively sorted object keys, so byte-identical inputs always
//! produce the same SHA-256 digest regardless of construction order. The
//! digest, truncated to 16 hex characters, is the row's `input_hash` and the
//! sole arbiter of whether recomputation is needed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest.
const INPUT_HASH_LEN: usize = 16;

/// Per-parameter statistics for one user, one week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterStat {
    pub mean: f64,
    pub variance: f64,
}

/// One user's weekly contribution to the canonical input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWeekInput {
    /// Parameter id → stats, sorted by key.
    pub parameters: BTreeMap<String, ParameterStat>,
    pub session_count: u32,
}

/// The deterministic representation of everything driving one weekly row.
///
/// All maps are `BTreeMap` so serialization is sorted by construction; the
/// struct field order is part of the canonical format and must not change
/// without bumping the pipeline compute version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalInputData {
    pub org_id: String,
    pub team_id: String,
    pub week_start_iso: String,
    /// User id → weekly stats, sorted by key.
    pub users: BTreeMap<String, UserWeekInput>,
}

impl CanonicalInputData {
    /// Canonical JSON: recursively sorted keys, no insignificant whitespace.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).expect("canonical input serializes");
        let sorted = sort_keys(value);
        serde_json::to_string(&sorted).expect("sorted value serializes")
    }

    /// SHA-256 of the canonical JSON, truncated to 16 hex characters.
    pub fn input_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..INPUT_HASH_LEN].to_string()
    }

    /// The object graph grounding claims are verified against.
    pub fn as_value(&self) -> Value {
        sort_keys(serde_json::to_value(self).expect("canonical input serializes"))
    }
}

/// Recursively rebuild a JSON value with sorted object keys.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// blake3 content hash for evidence payloads stored alongside rows.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalInputData {
        let mut users = BTreeMap::new();
        let mut params = BTreeMap::new();
        params.insert(
            "emotional_load".to_string(),
            ParameterStat {
                mean: 0.82,
                variance: 0.01,
            },
        );
        params.insert(
            "psych_safety".to_string(),
            ParameterStat {
                mean: 0.3,
                variance: 0.02,
            },
        );
        users.insert(
            "u-2".to_string(),
            UserWeekInput {
                parameters: params.clone(),
                session_count: 1,
            },
        );
        users.insert(
            "u-1".to_string(),
            UserWeekInput {
                parameters: params,
                session_count: 2,
            },
        );
        CanonicalInputData {
            org_id: "acme".into(),
            team_id: "platform".into(),
            week_start_iso: "2026-07-27".into(),
            users,
        }
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let hash = sample().input_hash();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identical_inputs_hash_identically() {
        assert_eq!(sample().input_hash(), sample().input_hash());
    }

    #[test]
    fn insertion_order_does_not_change_the_hash() {
        let a = sample();
        // Rebuild with reversed insertion order.
        let mut users = BTreeMap::new();
        for (k, v) in a.users.iter().rev() {
            users.insert(k.clone(), v.clone());
        }
        let b = CanonicalInputData {
            org_id: a.org_id.clone(),
            team_id: a.team_id.clone(),
            week_start_iso: a.week_start_iso.clone(),
            users,
        };
        assert_eq!(a.input_hash(), b.input_hash());
    }

    #[test]
    fn any_field_change_changes_the_hash() {
        let a = sample();
        let mut b = sample();
        b.users.get_mut("u-1").unwrap().session_count = 3;
        assert_ne!(a.input_hash(), b.input_hash());

        let mut c = sample();
        c.users
            .get_mut("u-2")
            .unwrap()
            .parameters
            .get_mut("psych_safety")
            .unwrap()
            .mean = 0.31;
        assert_ne!(a.input_hash(), c.input_hash());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let json = sample().canonical_json();
        let org_pos = json.find("\"org_id\"").unwrap();
        let team_pos = json.find("\"team_id\"").unwrap();
        let users_pos = json.find("\"users\"").unwrap();
        assert!(org_pos < team_pos && team_pos < users_pos);
        let u1 = json.find("u-1").unwrap();
        let u2 = json.find("u-2").unwrap();
        assert!(u1 < u2);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
