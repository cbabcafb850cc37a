//! Bots, precalculated bots and the sparse state diffs returned by batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Full bot-state mapping, keyed by bot id. Ordered so every traversal of
/// the state is deterministic.
pub type BotsState = BTreeMap<String, Bot>;

/// Full precalculated snapshot, keyed by bot id.
pub type PrecalculatedBotsState = BTreeMap<String, PrecalculatedBot>;

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

/// An addressable entity with raw tag values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    /// Unique, immutable identity.
    pub id: String,
    /// Opaque partition label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    /// Raw tag values.
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
}

impl Bot {
    /// A bot with no tags.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            space: None,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style tag insertion, mostly for tests and fixtures.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(tag.into(), value.into());
        self
    }

    /// Builder-style space label.
    #[must_use]
    pub fn in_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// Sorted names of the tags that currently hold a non-empty value.
    #[must_use]
    pub fn tag_names(&self) -> Vec<String> {
        tags_on(&self.tags)
    }
}

fn tags_on(tags: &BTreeMap<String, Value>) -> Vec<String> {
    tags.iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(tag, _)| tag.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// PrecalculatedBot
// ---------------------------------------------------------------------------

/// A bot's raw tags paired with their most recently computed values.
///
/// Every key in `values` is also a key in `tags`. Values are copiable data
/// only: functions and errors have already been normalised to strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecalculatedBot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    /// Always `true`; lets consumers tell snapshots from raw bots.
    #[serde(default = "default_true")]
    pub precalculated: bool,
    pub tags: BTreeMap<String, Value>,
    pub values: BTreeMap<String, Value>,
}

const fn default_true() -> bool {
    true
}

impl PrecalculatedBot {
    /// An empty snapshot for `bot`; values are filled in by the manager.
    #[must_use]
    pub fn from_bot(bot: &Bot) -> Self {
        Self {
            id: bot.id.clone(),
            space: bot.space.clone(),
            precalculated: true,
            tags: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Computed value of `tag`, if present.
    #[must_use]
    pub fn value(&self, tag: &str) -> Option<&Value> {
        self.values.get(tag)
    }

    /// Sorted names of the tags that currently hold a non-empty raw value.
    #[must_use]
    pub fn tag_names(&self) -> Vec<String> {
        tags_on(&self.tags)
    }
}

// ---------------------------------------------------------------------------
// Updates and diffs
// ---------------------------------------------------------------------------

/// Input to `bots_updated`: the new bot state plus the tags that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotUpdate {
    pub bot: Bot,
    pub tags: Vec<String>,
}

impl BotUpdate {
    #[must_use]
    pub fn new(bot: Bot, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            bot,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Changed raw tags and computed values of a pre-existing bot.
///
/// A `null` entry means the key was cleared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialPrecalculatedBot {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Value>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// One bot's entry in a [`StateUpdate`].
///
/// New bots carry their full snapshot, pre-existing bots carry only what
/// changed, removed bots serialise as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BotStateDiff {
    Added(PrecalculatedBot),
    Updated(PartialPrecalculatedBot),
    Removed,
}

impl BotStateDiff {
    /// Record a computed value in this entry.
    pub fn set_value(&mut self, tag: &str, value: Value) {
        match self {
            Self::Added(bot) => {
                if value.is_empty() {
                    bot.values.remove(tag);
                } else {
                    bot.values.insert(tag.to_string(), value);
                }
            }
            Self::Updated(partial) => {
                partial.values.insert(tag.to_string(), value);
            }
            Self::Removed => {}
        }
    }

    /// Record a raw tag change in this entry.
    pub fn set_tag(&mut self, tag: &str, value: Value) {
        match self {
            Self::Added(bot) => {
                if value.is_empty() {
                    bot.tags.remove(tag);
                } else {
                    bot.tags.insert(tag.to_string(), value);
                }
            }
            Self::Updated(partial) => {
                partial.tags.insert(tag.to_string(), value);
            }
            Self::Removed => {}
        }
    }
}

/// Result of a batch: the sparse state diff plus id lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub state: BTreeMap<String, BotStateDiff>,
    pub added_bots: Vec<String>,
    pub removed_bots: Vec<String>,
    pub updated_bots: Vec<String>,
}

impl StateUpdate {
    /// Returns `true` when nothing was added, removed, or changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
            && self.added_bots.is_empty()
            && self.removed_bots.is_empty()
            && self.updated_bots.is_empty()
    }

    /// The changed values recorded for a pre-existing bot.
    #[must_use]
    pub fn updated_values(&self, id: &str) -> Option<&BTreeMap<String, Value>> {
        match self.state.get(id)? {
            BotStateDiff::Updated(partial) => Some(&partial.values),
            BotStateDiff::Added(bot) => Some(&bot.values),
            BotStateDiff::Removed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_skip_empty_values() {
        let bot = Bot::new("a")
            .with_tag("b", "x")
            .with_tag("a", 1)
            .with_tag("c", "")
            .with_tag("d", Value::Null);
        assert_eq!(bot.tag_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn removed_entries_serialize_as_null() {
        let mut update = StateUpdate::default();
        update.state.insert("gone".into(), BotStateDiff::Removed);
        update.removed_bots.push("gone".into());
        let json = serde_json::to_value(&update).expect("serialize");
        assert!(json["state"]["gone"].is_null());
        assert_eq!(json["removedBots"][0], "gone");
    }

    #[test]
    fn partial_entries_keep_null_values() {
        let mut diff = BotStateDiff::Updated(PartialPrecalculatedBot::default());
        diff.set_tag("x", Value::Null);
        diff.set_value("x", Value::Null);
        let json = serde_json::to_value(&diff).expect("serialize");
        assert!(json["tags"]["x"].is_null());
        assert!(json["values"]["x"].is_null());
        assert!(json["values"].as_object().is_some_and(|v| v.contains_key("x")));
    }
}
