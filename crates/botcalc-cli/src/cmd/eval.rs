//! `botcalc eval` — precalculate a state file and print computed values.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use botcalc_core::bot::PrecalculatedBotsState;
use botcalc_core::config::RuntimeConfig;
use botcalc_core::literal::format_value;
use botcalc_core::{PrecalcError, PrecalculationManager};
use clap::Args;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// State file: a JSON object mapping bot ids to bots.
    pub state: PathBuf,

    /// Only print this bot.
    #[arg(long)]
    pub bot: Option<String>,
}

pub fn run_eval(args: &EvalArgs, config: RuntimeConfig, output: OutputMode) -> Result<()> {
    let bots = super::load_state(&args.state)?;
    let mut manager = PrecalculationManager::new(config);
    let update = manager.bots_added(bots)?;
    debug!(bots = update.added_bots.len(), stats = ?manager.tracker_stats(), "state evaluated");

    let mut state = manager.get_all_precalculated_state().clone();
    if let Some(id) = &args.bot {
        if !state.contains_key(id) {
            return Err(PrecalcError::UnknownBot(id.clone()).into());
        }
        state.retain(|key, _| key == id);
    }

    render_mode(output, &state, write_text, write_pretty)
}

/// One `bot<TAB>tag<TAB>value` row per computed value.
fn write_text(state: &PrecalculatedBotsState, w: &mut dyn Write) -> io::Result<()> {
    for (id, bot) in state {
        for (tag, value) in &bot.values {
            writeln!(w, "{id}\t{tag}\t{}", format_value(value).unwrap_or_default())?;
        }
    }
    Ok(())
}

fn write_pretty(state: &PrecalculatedBotsState, w: &mut dyn Write) -> io::Result<()> {
    for (idx, (id, bot)) in state.iter().enumerate() {
        if idx > 0 {
            writeln!(w)?;
        }
        let heading = bot
            .space
            .as_ref()
            .map_or_else(|| id.clone(), |space| format!("{id} ({space})"));
        pretty_section(w, &heading)?;
        for (tag, value) in &bot.values {
            pretty_kv(w, tag, format_value(value).unwrap_or_default())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use botcalc_core::Bot;

    #[test]
    fn text_rows_use_formatted_values() {
        let mut manager = PrecalculationManager::default();
        manager
            .bots_added(vec![
                Bot::new("a").with_tag("list", "[1, =1+1]").with_tag("n", "=2 * 3"),
            ])
            .expect("add");
        let mut buf = Vec::new();
        write_text(manager.get_all_precalculated_state(), &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, "a\tlist\t[1,2]\na\tn\t6\n");
    }
}
