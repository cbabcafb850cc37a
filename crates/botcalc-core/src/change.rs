//! JSON-lines change scripts: one batch per line.
//!
//! ```text
//! {"op":"add","bots":[{"id":"a","tags":{"x":1}}]}
//! {"op":"update","id":"a","tags":{"x":2,"y":null}}
//! {"op":"remove","ids":["a"]}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bot::{Bot, BotUpdate, StateUpdate};
use crate::error::PrecalcError;
use crate::precalc::PrecalculationManager;
use crate::value::Value;

/// One batch of a change script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Add { bots: Vec<Bot> },
    Remove { ids: Vec<String> },
    /// Write the listed tags; `null` or `""` clears a tag.
    Update {
        id: String,
        #[serde(default)]
        tags: BTreeMap<String, Value>,
    },
}

impl Change {
    /// Run this change as one batch.
    ///
    /// # Errors
    ///
    /// Propagates the structural error of the underlying batch.
    pub fn apply(self, manager: &mut PrecalculationManager) -> Result<StateUpdate, PrecalcError> {
        match self {
            Self::Add { bots } => manager.bots_added(bots),
            Self::Remove { ids } => manager.bots_removed(ids),
            Self::Update { id, tags } => {
                let space = manager
                    .raw_state()
                    .get(&id)
                    .ok_or_else(|| PrecalcError::UnknownBot(id.clone()))?
                    .space
                    .clone();
                let names: Vec<String> = tags.keys().cloned().collect();
                let bot = Bot { id, space, tags };
                manager.bots_updated(vec![BotUpdate::new(bot, names)])
            }
        }
    }
}

/// Parse a JSON-lines change script. Blank lines and lines starting with
/// `//` are skipped.
///
/// # Errors
///
/// [`PrecalcError::InvalidChange`] with the 1-based line number of the
/// first entry that does not parse.
pub fn parse_changes(script: &str) -> Result<Vec<Change>, PrecalcError> {
    let mut changes = Vec::new();
    for (idx, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let change = serde_json::from_str(line).map_err(|err| PrecalcError::InvalidChange {
            line: idx + 1,
            reason: err.to_string(),
        })?;
        changes.push(change);
    }
    Ok(changes)
}
