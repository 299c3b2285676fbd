//! Grounding verification for generated narratives.
//!
//! Every claim a narrative makes must cite paths that resolve inside the
//! canonical input that produced it. Verification is all-or-nothing: one
//! unresolvable path rejects the entire claim set, because a partially
//! grounded psychometric report is a credibility risk, not a cosmetic
//! defect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One narrative claim with the data paths that justify it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingEntry {
    pub claim_text: String,
    /// Dot-notation paths with optional `[n]` indices, e.g.
    /// `users.u-1.parameters.psych_safety.mean` or `$.indices[0].value`.
    pub sources: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("claim {claim:?} cites unresolvable path {path:?}")]
    UnresolvedPath { claim: String, path: String },
    #[error("claim {claim:?} cites no sources")]
    NoSources { claim: String },
    #[error("path segment {segment:?} is malformed in {path:?}")]
    MalformedPath { path: String, segment: String },
}

/// Verify a whole claim set against the canonical input.
///
/// Returns `Ok(())` only when every source path of every claim resolves to
/// a defined value. The first failure aborts the batch.
pub fn assert_grounding_map(entries: &[GroundingEntry], canonical: &Value) -> Result<(), GroundingError> {
    for entry in entries {
        if entry.sources.is_empty() {
            return Err(GroundingError::NoSources {
                claim: entry.claim_text.clone(),
            });
        }
        for path in &entry.sources {
            let resolved = resolve_path(canonical, path)?;
            if resolved.is_none() {
                return Err(GroundingError::UnresolvedPath {
                    claim: entry.claim_text.clone(),
                    path: path.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Resolve a dot-notation path with optional `[n]` array indices.
///
/// A leading `$` (JSONPath-style root) is accepted and skipped. `Ok(None)`
/// means the path is well-formed but absent; `Err` means it cannot be
/// parsed at all.
pub fn resolve_path<'v>(root: &'v Value, path: &str) -> Result<Option<&'v Value>, GroundingError> {
    let trimmed = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut current = root;

    for raw_segment in trimmed.split('.') {
        if raw_segment.is_empty() {
            return Err(GroundingError::MalformedPath {
                path: path.to_string(),
                segment: raw_segment.to_string(),
            });
        }

        let (name, indices) = split_indices(path, raw_segment)?;

        if !name.is_empty() {
            match current.get(name) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        for idx in indices {
            match current.get(idx) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
    }

    if current.is_null() {
        return Ok(None);
    }
    Ok(Some(current))
}

/// Split `name[0][2]` into (`name`, `[0, 2]`).
fn split_indices<'s>(
    full_path: &str,
    segment: &'s str,
) -> Result<(&'s str, Vec<usize>), GroundingError> {
    let malformed = || GroundingError::MalformedPath {
        path: full_path.to_string(),
        segment: segment.to_string(),
    };

    let Some(bracket) = segment.find('[') else {
        return Ok((segment, Vec::new()));
    };

    let name = &segment[..bracket];
    let mut indices = Vec::new();
    let mut rest = &segment[bracket..];
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.split_once(']'))
            .ok_or_else(malformed)?;
        let idx: usize = inner.0.parse().map_err(|_| malformed())?;
        indices.push(idx);
        rest = inner.1;
    }
    Ok((name, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonical() -> Value {
        json!({
            "org_id": "acme",
            "indices": [
                { "current": { "value": 0.42, "qualitative": "at_risk" } },
                { "current": { "value": 0.61, "qualitative": "healthy" } }
            ],
            "users": {
                "u-1": { "parameters": { "psych_safety": { "mean": 0.3 } } }
            }
        })
    }

    fn entry(claim: &str, sources: &[&str]) -> GroundingEntry {
        GroundingEntry {
            claim_text: claim.into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn existing_path_passes() {
        let entries = vec![entry(
            "safety is low",
            &["$.indices[0].current.value", "users.u-1.parameters.psych_safety.mean"],
        )];
        assert!(assert_grounding_map(&entries, &canonical()).is_ok());
    }

    #[test]
    fn unknown_field_fails_the_whole_batch() {
        let entries = vec![
            entry("grounded claim", &["org_id"]),
            entry("hallucinated claim", &["$.indices[0].nonexistent"]),
        ];
        let err = assert_grounding_map(&entries, &canonical()).unwrap_err();
        match err {
            GroundingError::UnresolvedPath { path, .. } => {
                assert_eq!(path, "$.indices[0].nonexistent");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_index_fails() {
        let entries = vec![entry("claim", &["indices[7].current.value"])];
        assert!(assert_grounding_map(&entries, &canonical()).is_err());
    }

    #[test]
    fn claim_without_sources_fails() {
        let entries = vec![entry("floating claim", &[])];
        assert!(matches!(
            assert_grounding_map(&entries, &canonical()),
            Err(GroundingError::NoSources { .. })
        ));
    }

    #[test]
    fn null_value_counts_as_undefined() {
        let value = json!({ "a": null });
        assert!(resolve_path(&value, "a").unwrap().is_none());
    }

    #[test]
    fn malformed_bracket_is_a_parse_error() {
        let value = canonical();
        assert!(matches!(
            resolve_path(&value, "indices[x].current"),
            Err(GroundingError::MalformedPath { .. })
        ));
    }

    #[test]
    fn bare_root_prefix_is_accepted() {
        let value = canonical();
        assert!(resolve_path(&value, "$.org_id").unwrap().is_some());
        assert!(resolve_path(&value, "org_id").unwrap().is_some());
    }
}
