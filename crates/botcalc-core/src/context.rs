//! Calculation context: one batch's view of the bot set.
//!
//! A context is opened over the raw bot state *after* a batch has applied
//! its mutations and lives for that batch only. It computes tag values on
//! demand, memoises them, and records the selectors each formula reads
//! into the [`DependencyTracker`].
//!
//! # Failure handling
//!
//! A formula that fails to parse computes to its own source text. A formula
//! that fails while running computes to `"<ErrorName>: <message>"`. Either
//! way the batch continues. Only cycle and depth overruns travel upward as
//! `Err`, and only as far as the formula that triggered them.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::bot::BotsState;
use crate::config::RuntimeConfig;
use crate::dependency::{Dependency, DependencyTracker, TagRef};
use crate::error::EvalError;
use crate::literal;
use crate::sandbox::{ExpressionEvaluator, Host};
use crate::value::Value;

/// A formula failure observed during the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaError {
    pub node: TagRef,
    pub error: EvalError,
}

/// A formula evaluation in progress. Assignments run without a node.
#[derive(Debug)]
struct Frame {
    node: Option<TagRef>,
    dependencies: Vec<Dependency>,
}

pub struct CalculationContext<'a> {
    bots: &'a BotsState,
    evaluator: &'a dyn ExpressionEvaluator,
    config: &'a RuntimeConfig,
    tracker: &'a mut DependencyTracker,
    memo: HashMap<TagRef, Value>,
    stack: Vec<Frame>,
    errors: Vec<FormulaError>,
    evaluations: usize,
}

impl<'a> CalculationContext<'a> {
    pub fn new(
        bots: &'a BotsState,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a RuntimeConfig,
        tracker: &'a mut DependencyTracker,
    ) -> Self {
        Self {
            bots,
            evaluator,
            config,
            tracker,
            memo: HashMap::new(),
            stack: Vec::new(),
            errors: Vec::new(),
            evaluations: 0,
        }
    }

    /// Computed value of `tag` on bot `id`; `Value::Null` when absent.
    ///
    /// The node's recorded dependencies are replaced by what this
    /// evaluation reads. An absent tag drops its dependencies.
    ///
    /// # Errors
    ///
    /// Returns a `CycleError` when `tag` is already being evaluated further
    /// up the stack, and a `RangeError` when nesting exceeds `max_depth`.
    pub fn calculate_tag(&mut self, id: &str, tag: &str) -> Result<Value, EvalError> {
        let node = TagRef::new(id, tag);
        if let Some(value) = self.memo.get(&node) {
            return Ok(value.clone());
        }

        let bots = self.bots;
        let Some(raw) = bots.get(id).and_then(|bot| bot.tags.get(tag)) else {
            self.tracker.clear(&node);
            self.memo.insert(node, Value::Null);
            return Ok(Value::Null);
        };

        if self.stack.iter().any(|frame| frame.node.as_ref() == Some(&node)) {
            return Err(EvalError::cycle("Circular dependency detected"));
        }
        if self.stack.len() >= self.config.max_depth {
            return Err(EvalError::range(format!(
                "Maximum formula depth of {} exceeded",
                self.config.max_depth
            )));
        }

        self.stack.push(Frame {
            node: Some(node.clone()),
            dependencies: Vec::new(),
        });
        let value = literal::calculate_value(raw, &mut |formula| self.run_formula(formula, id, tag));
        let dependencies = self.stack.pop().map(|frame| frame.dependencies).unwrap_or_default();

        self.tracker.record(&node, dependencies);
        self.memo.insert(node, value.clone());
        Ok(value)
    }

    /// Every non-empty computed value on bot `id`.
    pub fn calculate_bot(&mut self, id: &str) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let bots = self.bots;
        let Some(bot) = bots.get(id) else {
            return values;
        };
        for tag in bot.tags.keys() {
            let value = self
                .calculate_tag(id, tag)
                .unwrap_or_else(|err| Value::String(err.to_string()));
            if !value.is_empty() {
                values.insert(tag.clone(), value);
            }
        }
        values
    }

    /// Evaluate an assignment formula once, without memoising the result or
    /// recording dependencies for it. The formula may read its own tag,
    /// which yields the previously cached value.
    pub fn evaluate_assignment(&mut self, id: &str, tag: &str, formula: &str) -> Value {
        self.stack.push(Frame {
            node: None,
            dependencies: Vec::new(),
        });
        let value = self.run_formula(formula, id, tag);
        self.stack.pop();
        value
    }

    fn run_formula(&mut self, formula: &str, id: &str, tag: &str) -> Value {
        self.evaluations += 1;
        let evaluator = self.evaluator;
        match evaluator.evaluate(formula, Some(id), self) {
            Ok(value) => value,
            Err(error) => {
                if self.config.log_formula_errors {
                    warn!(target: "botcalc::formula", bot = %id, tag = %tag, %error, "formula evaluation failed");
                }
                let value = if error.is_syntax() {
                    Value::String(formula.to_string())
                } else {
                    Value::String(error.to_string())
                };
                self.errors.push(FormulaError {
                    node: TagRef::new(id, tag),
                    error,
                });
                value
            }
        }
    }

    /// Dependency graph as updated by this context so far.
    #[must_use]
    pub fn tracker(&self) -> &DependencyTracker {
        self.tracker
    }

    /// Formula failures seen so far, in evaluation order.
    #[must_use]
    pub fn errors(&self) -> &[FormulaError] {
        &self.errors
    }

    /// Number of formula evaluations run so far (memo hits excluded).
    #[must_use]
    pub const fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl Host for CalculationContext<'_> {
    fn bot_ids(&self) -> Vec<String> {
        self.bots.keys().cloned().collect()
    }

    fn contains_bot(&self, id: &str) -> bool {
        self.bots.contains_key(id)
    }

    fn bot_space(&self, id: &str) -> Option<String> {
        self.bots.get(id).and_then(|bot| bot.space.clone())
    }

    fn tag_names(&self, id: &str) -> Vec<String> {
        self.bots.get(id).map(crate::bot::Bot::tag_names).unwrap_or_default()
    }

    fn tag_value(&mut self, id: &str, tag: &str) -> Result<Value, EvalError> {
        self.calculate_tag(id, tag)
    }

    fn record(&mut self, dependency: Dependency) {
        if let Some(frame) = self.stack.last_mut() {
            if !frame.dependencies.contains(&dependency) {
                frame.dependencies.push(dependency);
            }
        }
    }
}
