//! `botcalc filter` — show how a tag name parses as a filter tag.

use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::Result;
use botcalc_core::filter::{FilterParse, parse_filter_tag};
use botcalc_core::literal::format_value;
use clap::Args;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Tag name, e.g. `onClick(#color:"red")`.
    pub tag: String,
}

pub fn run_filter(args: &FilterArgs, output: OutputMode) -> Result<()> {
    let parsed = parse_filter_tag(&args.tag);
    render_mode(output, &parsed, write_text, write_pretty)
}

fn status(parsed: &FilterParse) -> &'static str {
    if parsed.is_success() {
        "complete"
    } else if parsed.is_partial() {
        "partial"
    } else {
        "invalid"
    }
}

fn write_text(parsed: &FilterParse, w: &mut dyn Write) -> io::Result<()> {
    let (tag, value) = parsed.filter().map_or((String::new(), String::new()), |filter| {
        (filter.tag.clone(), format_value(&filter.value).unwrap_or_default())
    });
    writeln!(
        w,
        "{}\t{}\t{tag}\t{value}",
        status(parsed),
        parsed.event_name().unwrap_or_default()
    )
}

fn write_pretty(parsed: &FilterParse, w: &mut dyn Write) -> io::Result<()> {
    pretty_kv(w, "status", status(parsed))?;
    if let Some(event) = parsed.event_name() {
        pretty_kv(w, "event", event)?;
    }
    if let Some(filter) = parsed.filter() {
        pretty_kv(w, "tag", &filter.tag)?;
        pretty_kv(w, "value", format_value(&filter.value).unwrap_or_default())?;
        pretty_kv(w, "type", filter.value.type_name())?;
    }
    Ok(())
}
