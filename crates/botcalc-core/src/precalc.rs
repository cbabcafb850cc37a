//! Precalculation manager: keeps computed values for every bot current as
//! bots are added, removed and updated.
//!
//! # Batch shape
//!
//! Every entry point runs the same four steps:
//!
//! 1. Validate the request. Structural errors return before anything
//!    changes, so a failed batch leaves the manager untouched.
//! 2. Mutate the raw mirror and resolve pending assignments.
//! 3. Open one [`CalculationContext`] over the post-batch state.
//! 4. Drain a FIFO worklist of affected `(bot, tag)` nodes. A node whose
//!    value changed updates its snapshot, the diff and `updatedBots`, then
//!    queues its own dependents. Each node runs at most once per batch.
//!
//! Because the context only ever sees the final state of the batch, a
//! memoised value is final the moment it is computed.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use tracing::debug;

use crate::accessor::BotAccessor;
use crate::bot::{
    Bot, BotStateDiff, BotUpdate, BotsState, PartialPrecalculatedBot, PrecalculatedBot,
    PrecalculatedBotsState, StateUpdate,
};
use crate::config::RuntimeConfig;
use crate::context::CalculationContext;
use crate::dependency::{Dependency, DependencyTracker, TagChange, TagRef, TrackerStats};
use crate::error::PrecalcError;
use crate::filter::{self, FilterTag};
use crate::literal;
use crate::sandbox::{ExpressionEvaluator, Sandbox};
use crate::value::{Assignment, Value};

pub struct PrecalculationManager {
    bots: BotsState,
    precalculated: PrecalculatedBotsState,
    tracker: DependencyTracker,
    evaluator: Box<dyn ExpressionEvaluator>,
    config: RuntimeConfig,
}

impl fmt::Debug for PrecalculationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecalculationManager")
            .field("bots", &self.bots.len())
            .field("tracker", &self.tracker.stats())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for PrecalculationManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl PrecalculationManager {
    /// A manager using the reference [`Sandbox`].
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let evaluator = Box::new(Sandbox::new(config.max_steps));
        Self::with_evaluator(config, evaluator)
    }

    #[must_use]
    pub fn with_evaluator(config: RuntimeConfig, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            bots: BotsState::new(),
            precalculated: PrecalculatedBotsState::new(),
            tracker: DependencyTracker::new(),
            evaluator,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The raw bot state as of the last batch.
    #[must_use]
    pub const fn raw_state(&self) -> &BotsState {
        &self.bots
    }

    /// Full current snapshot of every bot.
    #[must_use]
    pub const fn get_all_precalculated_state(&self) -> &PrecalculatedBotsState {
        &self.precalculated
    }

    #[must_use]
    pub fn bot(&self, id: &str) -> Option<&PrecalculatedBot> {
        self.precalculated.get(id)
    }

    /// Recorded selectors for one tag, if it is a formula that read any.
    #[must_use]
    pub fn dependencies_of(&self, bot: &str, tag: &str) -> Option<&[Dependency]> {
        self.tracker.dependencies_of(&TagRef::new(bot, tag))
    }

    #[must_use]
    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Read/write handle for one bot.
    pub fn accessor(&mut self, id: &str) -> Option<BotAccessor<'_>> {
        self.bots.contains_key(id).then(|| BotAccessor::new(self, id))
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    /// Add new bots, compute all of their tags, and recompute every existing
    /// tag whose selectors match them.
    ///
    /// # Errors
    ///
    /// [`PrecalcError::DuplicateBot`] if an id already exists or repeats
    /// within the batch.
    pub fn bots_added(&mut self, bots: Vec<Bot>) -> Result<StateUpdate, PrecalcError> {
        let mut ids = BTreeSet::new();
        for bot in &bots {
            if self.bots.contains_key(&bot.id) || !ids.insert(bot.id.as_str()) {
                return Err(PrecalcError::DuplicateBot(bot.id.clone()));
            }
        }

        let added: Vec<String> = bots.iter().map(|bot| bot.id.clone()).collect();
        let mut written = Vec::new();
        for mut bot in bots {
            bot.tags.retain(|_, value| !value.is_empty());
            written.extend(bot.tags.keys().map(|tag| TagRef::new(bot.id.as_str(), tag.as_str())));
            self.bots.insert(bot.id.clone(), bot);
        }
        self.resolve_assignments(&written);

        let mut update = StateUpdate {
            added_bots: added.clone(),
            ..StateUpdate::default()
        };
        let Self {
            bots,
            precalculated,
            tracker,
            evaluator,
            config,
        } = self;
        let bots: &BotsState = bots;
        let mut ctx = CalculationContext::new(bots, evaluator.as_ref(), config, tracker);
        let mut recalc = Recalculation::new(precalculated, &mut update);
        recalc.fresh.extend(added.iter().cloned());

        for id in &added {
            let Some(bot) = bots.get(id) else {
                continue;
            };
            let mut snapshot = PrecalculatedBot::from_bot(bot);
            snapshot.tags.clone_from(&bot.tags);
            snapshot.values = ctx.calculate_bot(id);

            let affected = ctx.tracker().dependents_of_bot(id, &snapshot.values);
            recalc.enqueue(affected);
            recalc.update.state.insert(id.clone(), BotStateDiff::Added(snapshot.clone()));
            recalc.precalculated.insert(id.clone(), snapshot);
        }

        let recomputed = recalc.run(&mut ctx);
        debug!(
            added = added.len(),
            recomputed,
            evaluations = ctx.evaluations(),
            errors = ctx.errors().len(),
            updated = update.updated_bots.len(),
            "bots added"
        );
        Ok(update)
    }

    /// Remove bots and recompute every tag whose selectors matched them.
    ///
    /// # Errors
    ///
    /// [`PrecalcError::UnknownBot`] if any id is not present.
    pub fn bots_removed<I, S>(&mut self, ids: I) -> Result<StateUpdate, PrecalcError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut removed: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !self.bots.contains_key(&id) {
                return Err(PrecalcError::UnknownBot(id));
            }
            if !removed.contains(&id) {
                removed.push(id);
            }
        }

        let mut update = StateUpdate::default();
        let mut last_values = Vec::with_capacity(removed.len());
        for id in &removed {
            self.bots.remove(id);
            self.tracker.remove_bot(id);
            let values = self
                .precalculated
                .remove(id)
                .map(|snapshot| snapshot.values)
                .unwrap_or_default();
            last_values.push((id.clone(), values));
            update.state.insert(id.clone(), BotStateDiff::Removed);
        }
        update.removed_bots.clone_from(&removed);

        let Self {
            bots,
            precalculated,
            tracker,
            evaluator,
            config,
        } = self;
        let bots: &BotsState = bots;
        let mut ctx = CalculationContext::new(bots, evaluator.as_ref(), config, tracker);
        let mut recalc = Recalculation::new(precalculated, &mut update);
        for (id, values) in &last_values {
            let affected = ctx.tracker().dependents_of_bot(id, values);
            recalc.enqueue(affected);
        }

        let recomputed = recalc.run(&mut ctx);
        debug!(
            removed = removed.len(),
            recomputed,
            evaluations = ctx.evaluations(),
            errors = ctx.errors().len(),
            updated = update.updated_bots.len(),
            "bots removed"
        );
        Ok(update)
    }

    /// Apply changed tags to existing bots and recompute what depends on
    /// them.
    ///
    /// Only the tags named in each [`BotUpdate`] are copied from the update
    /// into the raw state. An empty or missing value clears the tag.
    ///
    /// # Errors
    ///
    /// [`PrecalcError::UnknownBot`] if an update names a bot that is not
    /// present.
    pub fn bots_updated(&mut self, updates: Vec<BotUpdate>) -> Result<StateUpdate, PrecalcError> {
        if let Some(unknown) = updates.iter().find(|u| !self.bots.contains_key(&u.bot.id)) {
            return Err(PrecalcError::UnknownBot(unknown.bot.id.clone()));
        }

        // Roots in request order, with the raw value each had before.
        let mut roots: Vec<TagRef> = Vec::new();
        let mut previous: Vec<Option<Value>> = Vec::new();
        let mut moved: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for update in &updates {
            let id = update.bot.id.as_str();
            let Some(mirror) = self.bots.get_mut(id) else {
                continue;
            };
            if mirror.space != update.bot.space {
                mirror.space.clone_from(&update.bot.space);
                moved.push(id.to_string());
            }
            for tag in &update.tags {
                let new_raw = update.bot.tags.get(tag).filter(|value| !value.is_empty()).cloned();
                let old_raw = match new_raw {
                    Some(value) => mirror.tags.insert(tag.clone(), value),
                    None => mirror.tags.remove(tag),
                };
                let node = TagRef::new(id, tag.as_str());
                if seen.insert(node.clone()) {
                    roots.push(node);
                    previous.push(old_raw);
                }
            }
        }
        self.resolve_assignments(&roots);

        let mut update = StateUpdate::default();
        let Self {
            bots,
            precalculated,
            tracker,
            evaluator,
            config,
        } = self;
        let bots: &BotsState = bots;
        let mut ctx = CalculationContext::new(bots, evaluator.as_ref(), config, tracker);
        let mut recalc = Recalculation::new(precalculated, &mut update);

        // A space change reaches formulas that showed the bot's space or
        // scanned every bot.
        for id in &moved {
            let Some(snapshot) = recalc.precalculated.get_mut(id) else {
                continue;
            };
            snapshot.space = bots.get(id).and_then(|bot| bot.space.clone());
            let affected = ctx.tracker().dependents_of_move(id);
            recalc.enqueue(affected);
        }
        for (node, old_raw) in roots.iter().zip(&previous) {
            let raw = bots.get(&node.bot).and_then(|bot| bot.tags.get(&node.tag));
            if raw == old_raw.as_ref() {
                continue;
            }
            if let Some(snapshot) = recalc.precalculated.get_mut(&node.bot) {
                match raw {
                    Some(value) => snapshot.tags.insert(node.tag.clone(), value.clone()),
                    None => snapshot.tags.remove(&node.tag),
                };
            }
            recalc
                .diff_entry(&node.bot)
                .set_tag(&node.tag, raw.cloned().unwrap_or_default());
            recalc.mark_updated(&node.bot);
        }
        recalc.enqueue(roots.iter().cloned());

        let recomputed = recalc.run(&mut ctx);
        debug!(
            updates = updates.len(),
            tags = roots.len(),
            recomputed,
            evaluations = ctx.evaluations(),
            errors = ctx.errors().len(),
            updated = update.updated_bots.len(),
            "bots updated"
        );
        Ok(update)
    }

    /// Alias of [`Self::bots_added`].
    ///
    /// # Errors
    ///
    /// See [`Self::bots_added`].
    pub fn apply_added(&mut self, bots: Vec<Bot>) -> Result<StateUpdate, PrecalcError> {
        self.bots_added(bots)
    }

    /// Alias of [`Self::bots_removed`].
    ///
    /// # Errors
    ///
    /// See [`Self::bots_removed`].
    pub fn apply_removed<I, S>(&mut self, ids: I) -> Result<StateUpdate, PrecalcError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bots_removed(ids)
    }

    /// Alias of [`Self::bots_updated`].
    ///
    /// # Errors
    ///
    /// See [`Self::bots_updated`].
    pub fn apply_updated(&mut self, updates: Vec<BotUpdate>) -> Result<StateUpdate, PrecalcError> {
        self.bots_updated(updates)
    }

    /// Evaluate pending assignments among `nodes` once and store the result
    /// back into the raw tag.
    fn resolve_assignments(&mut self, nodes: &[TagRef]) {
        let pending: Vec<(&TagRef, String)> = nodes
            .iter()
            .filter_map(|node| {
                let raw = self.bots.get(&node.bot)?.tags.get(&node.tag)?;
                pending_assignment(raw).map(|formula| (node, formula.to_string()))
            })
            .collect();
        if pending.is_empty() {
            return;
        }

        // Assignments are evaluated once; their reads are not tracked.
        let mut scratch = DependencyTracker::new();
        let results: Vec<(&TagRef, String, Value)> = {
            let mut ctx = CalculationContext::new(&self.bots, self.evaluator.as_ref(), &self.config, &mut scratch);
            pending
                .into_iter()
                .map(|(node, formula)| {
                    let value = ctx.evaluate_assignment(&node.bot, &node.tag, &formula);
                    (node, formula, value)
                })
                .collect()
        };

        for (node, formula, value) in results {
            let Some(raw) = self.bots.get_mut(&node.bot).and_then(|bot| bot.tags.get_mut(&node.tag)) else {
                continue;
            };
            let assignment = match std::mem::take(raw) {
                Value::Assignment(assignment) => assignment,
                _ => Assignment::new(formula),
            };
            *raw = Value::Assignment(assignment.resolved(value));
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Sorted names of the non-empty raw tags on a bot.
    #[must_use]
    pub fn tags_on_bot(&self, id: &str) -> Vec<String> {
        self.precalculated
            .get(id)
            .map(PrecalculatedBot::tag_names)
            .unwrap_or_default()
    }

    /// A computed value formatted for display.
    #[must_use]
    pub fn calculate_formatted_bot_value(&self, id: &str, tag: &str) -> Option<String> {
        self.precalculated
            .get(id)
            .and_then(|bot| bot.values.get(tag))
            .and_then(literal::format_value)
    }

    /// Filter tags on `subject` for `event_name` that match `other`.
    #[must_use]
    pub fn tags_matching_filter(&self, subject: &str, other: &str, event_name: &str) -> Vec<String> {
        match (self.precalculated.get(subject), self.precalculated.get(other)) {
            (Some(subject), Some(other)) => filter::tags_matching_filter(subject, other, event_name),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if `tag` is a filter for `event_name` matching bot `id`.
    #[must_use]
    pub fn tag_matches_filter(&self, tag: &str, id: &str, event_name: &str) -> bool {
        self.precalculated
            .get(id)
            .is_some_and(|bot| filter::tag_matches_filter(tag, bot, event_name))
    }

    /// Every complete filter tag on bot `id` for `event_name`.
    #[must_use]
    pub fn filters_matching_arguments(&self, id: &str, event_name: &str) -> Vec<FilterTag> {
        self.precalculated
            .get(id)
            .map(|bot| filter::filters_matching_event(bot, event_name))
            .unwrap_or_default()
    }
}

/// Formula source of an assignment that still needs evaluating.
fn pending_assignment(raw: &Value) -> Option<&str> {
    match raw {
        Value::Assignment(assignment) if !assignment.is_resolved() => Some(&assignment.formula),
        Value::String(s) if literal::is_assignment_formula(s) => Some(s),
        _ => None,
    }
}

/// Absent and empty values compare equal.
fn same_value(old: Option<&Value>, new: &Value) -> bool {
    match old {
        Some(old) => old == new,
        None => new.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Worklist
// ---------------------------------------------------------------------------

struct Recalculation<'s> {
    precalculated: &'s mut PrecalculatedBotsState,
    update: &'s mut StateUpdate,
    /// Bots added in this batch; already computed in full.
    fresh: HashSet<String>,
    queue: VecDeque<TagRef>,
    queued: HashSet<TagRef>,
}

impl<'s> Recalculation<'s> {
    fn new(precalculated: &'s mut PrecalculatedBotsState, update: &'s mut StateUpdate) -> Self {
        Self {
            precalculated,
            update,
            fresh: HashSet::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    fn enqueue(&mut self, nodes: impl IntoIterator<Item = TagRef>) {
        for node in nodes {
            if self.fresh.contains(&node.bot) {
                continue;
            }
            if self.queued.insert(node.clone()) {
                self.queue.push_back(node);
            }
        }
    }

    fn mark_updated(&mut self, id: &str) {
        if self.fresh.contains(id) || self.update.updated_bots.iter().any(|u| u == id) {
            return;
        }
        self.update.updated_bots.push(id.to_string());
    }

    fn diff_entry(&mut self, id: &str) -> &mut BotStateDiff {
        self.update
            .state
            .entry(id.to_string())
            .or_insert_with(|| BotStateDiff::Updated(PartialPrecalculatedBot::default()))
    }

    /// Drain the queue; returns the number of nodes recomputed.
    fn run(&mut self, ctx: &mut CalculationContext<'_>) -> usize {
        let mut recomputed = 0;
        while let Some(node) = self.queue.pop_front() {
            let Some(snapshot) = self.precalculated.get_mut(&node.bot) else {
                continue;
            };
            recomputed += 1;

            let new = ctx
                .calculate_tag(&node.bot, &node.tag)
                .unwrap_or_else(|err| Value::String(err.to_string()));
            let old = snapshot.values.get(&node.tag);
            if same_value(old, &new) {
                continue;
            }

            let dependents = ctx.tracker().dependents_of_change(&TagChange {
                bot: &node.bot,
                tag: &node.tag,
                old,
                new: Some(&new).filter(|value| !value.is_empty()),
            });
            if new.is_empty() {
                snapshot.values.remove(&node.tag);
            } else {
                snapshot.values.insert(node.tag.clone(), new.clone());
            }

            self.diff_entry(&node.bot).set_value(&node.tag, new);
            self.mark_updated(&node.bot);
            self.enqueue(dependents);
        }
        recomputed
    }
}
