//! Execution sandbox: evaluates formula source against a bound bot and the
//! injected library.
//!
//! The sandbox never reaches bot state directly. Everything it reads goes
//! through a [`Host`], which the calculation context implements per batch.
//! That keeps the evaluator free of globals and lets the host memoise
//! values, guard against cycles and capture dependencies.
//!
//! ```text
//!   formula text ──► macros ──► parse (cached) ──► interpret ──► Value
//!                                                     │
//!                                           Host::tag_value / record
//! ```

mod interpreter;
mod lexer;
mod library;
mod parser;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dependency::Dependency;
use crate::error::EvalError;
use crate::value::Value;

use interpreter::Interpreter;
use parser::Expr;

/// Default interpreter step budget per top-level evaluation.
pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Parsed programs kept before the cache is flushed.
const PROGRAM_CACHE_LIMIT: usize = 4096;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Read access to the bot set for one evaluation, plus dependency capture.
///
/// `tag_value` may recursively evaluate other formulas; it returns `Err`
/// only for conditions that must abort the reading formula too (cycles and
/// depth overruns).
pub trait Host {
    /// Every bot id, ascending.
    fn bot_ids(&self) -> Vec<String>;

    fn contains_bot(&self, id: &str) -> bool;

    fn bot_space(&self, id: &str) -> Option<String>;

    /// Names of the non-empty tags on a bot, ascending.
    fn tag_names(&self, id: &str) -> Vec<String>;

    /// Computed value of a tag; `Value::Null` when absent.
    fn tag_value(&mut self, id: &str, tag: &str) -> Result<Value, EvalError>;

    /// Note that the running formula read `dependency`.
    fn record(&mut self, dependency: Dependency);

    /// A fresh unique id for `uuid()`.
    fn uuid(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Something that can run formula source.
pub trait ExpressionEvaluator {
    /// Evaluate `source` (a full tag value such as `=1 + 1`) with `this`
    /// bound to the bot `this`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] with [`crate::error::ErrorKind::Syntax`] when
    /// the source does not parse, and another kind when evaluation fails.
    fn evaluate(&self, source: &str, this: Option<&str>, host: &mut dyn Host) -> Result<Value, EvalError>;
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// A source rewrite applied before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    /// Drop a leading `:=` or `=`.
    StripFormulaMarker,
    /// Drop one trailing `;` (after trailing whitespace).
    StripTrailingSemicolon,
}

impl Macro {
    #[must_use]
    pub fn apply(self, source: &str) -> &str {
        match self {
            Self::StripFormulaMarker => source
                .strip_prefix(":=")
                .or_else(|| source.strip_prefix('='))
                .unwrap_or(source),
            Self::StripTrailingSemicolon => {
                let trimmed = source.trim_end();
                trimmed.strip_suffix(';').unwrap_or(source)
            }
        }
    }
}

/// Macros every [`Sandbox`] starts with, in order.
pub const DEFAULT_MACROS: &[Macro] = &[Macro::StripFormulaMarker, Macro::StripTrailingSemicolon];

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Reference [`ExpressionEvaluator`]: a small JavaScript-flavoured
/// expression interpreter.
#[derive(Debug)]
pub struct Sandbox {
    macros: Vec<Macro>,
    max_steps: usize,
    programs: RefCell<HashMap<String, Rc<Expr>>>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl Sandbox {
    #[must_use]
    pub fn new(max_steps: usize) -> Self {
        Self {
            macros: DEFAULT_MACROS.to_vec(),
            max_steps,
            programs: RefCell::new(HashMap::new()),
        }
    }

    /// Apply every macro, in order.
    #[must_use]
    pub fn preprocess<'a>(&self, source: &'a str) -> &'a str {
        self.macros.iter().fold(source, |body, m| m.apply(body))
    }

    /// Number of parsed programs currently cached.
    #[must_use]
    pub fn cached_programs(&self) -> usize {
        self.programs.borrow().len()
    }

    fn compile(&self, body: &str) -> Result<Rc<Expr>, EvalError> {
        if let Some(program) = self.programs.borrow().get(body) {
            return Ok(Rc::clone(program));
        }

        let program = Rc::new(parser::parse(body)?);
        let mut programs = self.programs.borrow_mut();
        if programs.len() >= PROGRAM_CACHE_LIMIT {
            programs.clear();
        }
        programs.insert(body.to_string(), Rc::clone(&program));
        Ok(program)
    }
}

impl ExpressionEvaluator for Sandbox {
    fn evaluate(&self, source: &str, this: Option<&str>, host: &mut dyn Host) -> Result<Value, EvalError> {
        let body = self.preprocess(source);
        // The cache borrow ends here; evaluation may re-enter `evaluate`.
        let program = self.compile(body)?;
        Interpreter::new(host, this, self.max_steps).run(&program)
    }
}
