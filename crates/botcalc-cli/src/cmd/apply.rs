//! `botcalc apply` — replay a change script against a state file.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context, Result};
use botcalc_core::change::{Change, parse_changes};
use botcalc_core::config::RuntimeConfig;
use botcalc_core::literal::format_value;
use botcalc_core::{BotStateDiff, PrecalculationManager, StateUpdate};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Initial state file: a JSON object mapping bot ids to bots.
    pub state: PathBuf,

    /// JSON-lines change script, one batch per line.
    pub changes: PathBuf,
}

/// Result of one replayed batch.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub batch: usize,
    pub op: &'static str,
    #[serde(flatten)]
    pub update: StateUpdate,
}

pub fn run_apply(args: &ApplyArgs, config: RuntimeConfig, output: OutputMode) -> Result<()> {
    let bots = super::load_state(&args.state)?;
    let script = std::fs::read_to_string(&args.changes)
        .with_context(|| format!("Failed to read {}", args.changes.display()))?;
    let changes = parse_changes(&script)?;

    let mut manager = PrecalculationManager::new(config);
    manager.bots_added(bots)?;

    let mut reports = Vec::with_capacity(changes.len());
    for (idx, change) in changes.into_iter().enumerate() {
        let op = op_name(&change);
        let update = change.apply(&mut manager)?;
        reports.push(BatchReport {
            batch: idx + 1,
            op,
            update,
        });
    }
    info!(batches = reports.len(), "change script applied");

    render_mode(output, reports.as_slice(), write_text, write_pretty)
}

const fn op_name(change: &Change) -> &'static str {
    match change {
        Change::Add { .. } => "add",
        Change::Remove { .. } => "remove",
        Change::Update { .. } => "update",
    }
}

/// Changed values of one diff entry; removed bots yield nothing.
fn changed_values(diff: &BotStateDiff) -> Option<&BTreeMap<String, botcalc_core::Value>> {
    match diff {
        BotStateDiff::Added(bot) => Some(&bot.values),
        BotStateDiff::Updated(partial) => Some(&partial.values),
        BotStateDiff::Removed => None,
    }
}

fn write_text(reports: &[BatchReport], w: &mut dyn Write) -> io::Result<()> {
    for report in reports {
        let update = &report.update;
        writeln!(
            w,
            "batch {}\t{}\tadded={}\tremoved={}\tupdated={}",
            report.batch,
            report.op,
            update.added_bots.join(","),
            update.removed_bots.join(","),
            update.updated_bots.join(",")
        )?;
        for (id, diff) in &update.state {
            let Some(values) = changed_values(diff) else {
                writeln!(w, "{id}\t-\tremoved")?;
                continue;
            };
            for (tag, value) in values {
                writeln!(w, "{id}\t{tag}\t{}", format_value(value).unwrap_or_default())?;
            }
        }
    }
    Ok(())
}

fn write_pretty(reports: &[BatchReport], w: &mut dyn Write) -> io::Result<()> {
    for report in reports {
        let update = &report.update;
        pretty_section(w, &format!("Batch {} ({})", report.batch, report.op))?;
        if !update.added_bots.is_empty() {
            pretty_kv(w, "added", update.added_bots.join(", "))?;
        }
        if !update.removed_bots.is_empty() {
            pretty_kv(w, "removed", update.removed_bots.join(", "))?;
        }
        pretty_kv(w, "updated", update.updated_bots.join(", "))?;
        for (id, diff) in &update.state {
            let Some(values) = changed_values(diff) else {
                continue;
            };
            for (tag, value) in values {
                let shown = format_value(value).unwrap_or_else(|| "(cleared)".to_string());
                writeln!(w, "  {id}.{tag} = {shown}")?;
            }
        }
        writeln!(w)?;
    }
    Ok(())
}
