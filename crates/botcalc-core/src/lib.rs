//! botcalc-core: reactive formula runtime for shared bot state.
//!
//! Every bot carries tags whose raw values are literals or formulas. The
//! [`PrecalculationManager`](precalc::PrecalculationManager) keeps a computed
//! snapshot of every tag and, for each batch of added, removed or updated
//! bots, recomputes only the tags whose value may have changed.
//!
//! # Conventions
//!
//! - **Errors**: structural batch errors are [`error::PrecalcError`]; formula
//!   failures never escape a batch and surface as values instead. Config
//!   loading uses `anyhow::Result`.
//! - **Logging**: `tracing` macros. Batches log a `debug!` summary; formula
//!   errors go to the `botcalc::formula` target when enabled.

pub mod accessor;
pub mod bot;
pub mod change;
pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod filter;
pub mod literal;
pub mod precalc;
pub mod sandbox;
pub mod value;

pub use bot::{Bot, BotStateDiff, BotUpdate, BotsState, PrecalculatedBot, StateUpdate};
pub use error::{ErrorCode, EvalError, PrecalcError};
pub use precalc::PrecalculationManager;
pub use value::{Assignment, Value};
