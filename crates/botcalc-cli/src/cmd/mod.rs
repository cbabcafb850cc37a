pub mod apply;
pub mod completions;
pub mod eval;
pub mod filter;
pub mod validate;

use anyhow::{Context, Result};
use botcalc_core::{Bot, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One entry of a state file; `id` defaults to the map key.
#[derive(Debug, Deserialize)]
struct StateEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    space: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, Value>,
}

/// Load a `{ id: Bot }` state file.
pub fn load_state(path: &Path) -> Result<Vec<Bot>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_state(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_state(content: &str) -> Result<Vec<Bot>> {
    let entries: BTreeMap<String, StateEntry> = serde_json::from_str(content)?;
    Ok(entries
        .into_iter()
        .map(|(key, entry)| Bot {
            id: entry.id.unwrap_or(key),
            space: entry.space,
            tags: entry.tags,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_default_to_keys() {
        let bots = parse_state(r#"{"a": {"tags": {"x": 1}}, "b": {"id": "b", "space": "tmp"}}"#)
            .expect("parse");
        assert_eq!(bots.len(), 2);
        assert_eq!(bots[0].id, "a");
        assert_eq!(bots[0].tags["x"], Value::Number(1.0));
        assert_eq!(bots[1].space.as_deref(), Some("tmp"));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_state(&dir.path().join("nope.json")).expect_err("missing");
        assert!(format!("{err:#}").contains("nope.json"));
    }
}
