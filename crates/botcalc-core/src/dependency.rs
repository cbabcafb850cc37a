//! Dependency tracking between formula tags and the selectors they read.
//!
//! # Model
//!
//! A *node* is a `(bot id, tag)` pair whose value was computed by a formula.
//! Each evaluation of a node records the [`Dependency`] selectors it touched.
//! Recording replaces the node's previous edges, so edges never accumulate
//! across formula edits.
//!
//! The tracker keeps one flat edge table plus four reverse indexes:
//!
//! - `all` — nodes that depend on every bot (unnarrowable queries)
//! - `by_tag` — nodes with a `Tag` or `TagValue` selector on a tag name
//! - `by_bot_tag` — nodes that read one specific bot's tag
//! - `by_bot_space` — nodes whose value shows one specific bot's space
//!
//! # Matching
//!
//! Over-matching is always safe (it only costs a re-evaluation); missing a
//! match leaves a stale value. Selectors therefore err on the side of
//! matching: a `TagValue` selector is checked against both the old and the
//! new value of a change.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::value::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A `(bot id, tag)` node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TagRef {
    pub bot: String,
    pub tag: String,
}

impl TagRef {
    #[must_use]
    pub fn new(bot: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            bot: bot.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.bot, self.tag)
    }
}

/// A producer selector read by a formula.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dependency {
    /// Any bot anywhere may affect the result.
    All,
    /// Which bots carry `tag`, and their values.
    Tag { tag: String },
    /// Which bots have `tag` equal to `value`.
    TagValue { tag: String, value: Value },
    /// One specific bot's tag.
    BotTag { bot: String, tag: String },
    /// One specific bot's space.
    BotSpace { bot: String },
}

impl Dependency {
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag { tag: tag.into() }
    }

    #[must_use]
    pub fn tag_value(tag: impl Into<String>, value: Value) -> Self {
        Self::TagValue {
            tag: tag.into(),
            value,
        }
    }

    #[must_use]
    pub fn bot_tag(bot: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::BotTag {
            bot: bot.into(),
            tag: tag.into(),
        }
    }

    #[must_use]
    pub fn bot_space(bot: impl Into<String>) -> Self {
        Self::BotSpace { bot: bot.into() }
    }

    /// Returns `true` if a change of `change.tag` on `change.bot` could
    /// alter a result that depends on this selector.
    #[must_use]
    pub fn matches_change(&self, change: &TagChange<'_>) -> bool {
        match self {
            Self::All => true,
            Self::Tag { tag } => tag == change.tag,
            Self::TagValue { tag, value } => {
                tag == change.tag
                    && (change.old.is_some_and(|old| old == value)
                        || change.new.is_some_and(|new| new == value))
            }
            Self::BotTag { bot, tag } => bot == change.bot && tag == change.tag,
            Self::BotSpace { .. } => false,
        }
    }

    /// Returns `true` if adding or removing a bot with `values` could alter
    /// a result that depends on this selector.
    #[must_use]
    pub fn matches_bot(&self, bot: &str, values: &BTreeMap<String, Value>) -> bool {
        match self {
            Self::All => true,
            Self::Tag { tag } => values.get(tag).is_some_and(|v| !v.is_empty()),
            Self::TagValue { tag, value } => values.get(tag).is_some_and(|v| v == value),
            Self::BotTag { bot: id, .. } | Self::BotSpace { bot: id } => id == bot,
        }
    }
}

/// A change of one tag on one bot, as seen by the matcher.
#[derive(Debug, Clone, Copy)]
pub struct TagChange<'a> {
    pub bot: &'a str,
    pub tag: &'a str,
    pub old: Option<&'a Value>,
    pub new: Option<&'a Value>,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub nodes: usize,
    pub edges: usize,
    pub all_dependents: usize,
}

// ---------------------------------------------------------------------------
// DependencyTracker
// ---------------------------------------------------------------------------

/// Bidirectional graph between formula nodes and the selectors they read.
///
/// Owned by exactly one precalculation manager; never shared between bot
/// state instances.
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    /// node → selectors recorded on its last evaluation.
    edges: BTreeMap<TagRef, Vec<Dependency>>,
    /// Nodes holding an `All` selector.
    all: BTreeSet<TagRef>,
    /// tag name → nodes holding a `Tag`/`TagValue` selector on it.
    by_tag: BTreeMap<String, BTreeSet<TagRef>>,
    /// (bot, tag) → nodes reading that exact bot tag.
    by_bot_tag: BTreeMap<TagRef, BTreeSet<TagRef>>,
    /// bot → nodes showing that bot's space.
    by_bot_space: BTreeMap<String, BTreeSet<TagRef>>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the edges of `node` with `dependencies`.
    ///
    /// An empty list removes the node entirely.
    pub fn record(&mut self, node: &TagRef, dependencies: Vec<Dependency>) {
        self.clear(node);
        if dependencies.is_empty() {
            return;
        }

        for dependency in &dependencies {
            match dependency {
                Dependency::All => {
                    self.all.insert(node.clone());
                }
                Dependency::Tag { tag } | Dependency::TagValue { tag, .. } => {
                    self.by_tag
                        .entry(tag.clone())
                        .or_default()
                        .insert(node.clone());
                }
                Dependency::BotTag { bot, tag } => {
                    self.by_bot_tag
                        .entry(TagRef::new(bot.as_str(), tag.as_str()))
                        .or_default()
                        .insert(node.clone());
                }
                Dependency::BotSpace { bot } => {
                    self.by_bot_space
                        .entry(bot.clone())
                        .or_default()
                        .insert(node.clone());
                }
            }
        }
        self.edges.insert(node.clone(), dependencies);
    }

    /// Drop every edge of `node`.
    pub fn clear(&mut self, node: &TagRef) {
        let Some(previous) = self.edges.remove(node) else {
            return;
        };

        for dependency in previous {
            match dependency {
                Dependency::All => {
                    self.all.remove(node);
                }
                Dependency::Tag { tag } | Dependency::TagValue { tag, .. } => {
                    remove_from_index(&mut self.by_tag, &tag, node);
                }
                Dependency::BotTag { bot, tag } => {
                    remove_from_index(&mut self.by_bot_tag, &TagRef::new(bot, tag), node);
                }
                Dependency::BotSpace { bot } => {
                    remove_from_index(&mut self.by_bot_space, &bot, node);
                }
            }
        }
    }

    /// Drop every node owned by bot `id`.
    pub fn remove_bot(&mut self, id: &str) {
        let owned: Vec<TagRef> = self
            .edges
            .range(TagRef::new(id, "")..)
            .take_while(|(node, _)| node.bot == id)
            .map(|(node, _)| node.clone())
            .collect();
        for node in owned {
            self.clear(&node);
        }
    }

    /// Edges recorded for `node`, if it is a formula node.
    #[must_use]
    pub fn dependencies_of(&self, node: &TagRef) -> Option<&[Dependency]> {
        self.edges.get(node).map(Vec::as_slice)
    }

    /// Nodes whose selectors match a change of one tag.
    ///
    /// Returned in a deterministic order: `BotTag` readers, then tag
    /// readers, then `All` readers, each sorted, without duplicates.
    #[must_use]
    pub fn dependents_of_change(&self, change: &TagChange<'_>) -> Vec<TagRef> {
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |node: &TagRef| {
            if seen.insert(node.clone()) {
                found.push(node.clone());
            }
        };

        if let Some(readers) = self.by_bot_tag.get(&TagRef::new(change.bot, change.tag)) {
            readers.iter().for_each(&mut push);
        }
        if let Some(candidates) = self.by_tag.get(change.tag) {
            for node in candidates {
                if self.node_matches(node, |dep| dep.matches_change(change)) {
                    push(node);
                }
            }
        }
        self.all.iter().for_each(&mut push);
        found
    }

    /// Nodes whose selectors match the presence of a bot with `values`
    /// (used for both additions and removals).
    #[must_use]
    pub fn dependents_of_bot(&self, bot: &str, values: &BTreeMap<String, Value>) -> Vec<TagRef> {
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |node: &TagRef| {
            if seen.insert(node.clone()) {
                found.push(node.clone());
            }
        };

        for (key, readers) in self.by_bot_tag.range(TagRef::new(bot, "")..) {
            if key.bot != bot {
                break;
            }
            readers.iter().for_each(&mut push);
        }
        if let Some(readers) = self.by_bot_space.get(bot) {
            readers.iter().for_each(&mut push);
        }
        for tag in values.keys() {
            let Some(candidates) = self.by_tag.get(tag) else {
                continue;
            };
            for node in candidates {
                if self.node_matches(node, |dep| dep.matches_bot(bot, values)) {
                    push(node);
                }
            }
        }
        self.all.iter().for_each(&mut push);
        found
    }

    /// Nodes that may change when bot `bot` moves to another space:
    /// readers of its space, then `All` readers.
    #[must_use]
    pub fn dependents_of_move(&self, bot: &str) -> Vec<TagRef> {
        let mut found: Vec<TagRef> = self
            .by_bot_space
            .get(bot)
            .map(|readers| readers.iter().cloned().collect())
            .unwrap_or_default();
        for node in &self.all {
            if !found.contains(node) {
                found.push(node.clone());
            }
        }
        found
    }

    /// Counters for diagnostics.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            nodes: self.edges.len(),
            edges: self.edges.values().map(Vec::len).sum(),
            all_dependents: self.all.len(),
        }
    }

    fn node_matches(&self, node: &TagRef, predicate: impl Fn(&Dependency) -> bool) -> bool {
        self.edges
            .get(node)
            .is_some_and(|deps| deps.iter().any(predicate))
    }
}

fn remove_from_index<K: Ord>(index: &mut BTreeMap<K, BTreeSet<TagRef>>, key: &K, node: &TagRef) {
    if let Some(set) = index.get_mut(key) {
        set.remove(node);
        if set.is_empty() {
            index.remove(key);
        }
    }
}
