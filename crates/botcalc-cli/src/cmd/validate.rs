//! `botcalc validate` — check tag names.

use crate::output::{OutputMode, render_mode};
use anyhow::Result;
use botcalc_core::filter::{TagError, TagValidation, validate_tag};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Tag names to check.
    #[arg(required = true)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TagReport {
    pub tag: String,
    #[serde(flatten)]
    pub validation: TagValidation,
}

/// Validate every tag; returns `true` when all of them are valid.
pub fn run_validate(args: &ValidateArgs, output: OutputMode) -> Result<bool> {
    let reports: Vec<TagReport> = args
        .tags
        .iter()
        .map(|tag| TagReport {
            tag: tag.clone(),
            validation: validate_tag(tag),
        })
        .collect();
    let all_valid = reports.iter().all(|report| report.validation.valid);
    render_mode(output, reports.as_slice(), write_text, write_pretty)?;
    Ok(all_valid)
}

const fn reason(error: TagError) -> &'static str {
    match error {
        TagError::Required => "required",
        TagError::InvalidChar => "invalid_char",
    }
}

fn reasons(validation: &TagValidation) -> String {
    validation
        .errors
        .iter()
        .map(|error| reason(*error))
        .collect::<Vec<_>>()
        .join(",")
}

fn write_text(reports: &[TagReport], w: &mut dyn Write) -> io::Result<()> {
    for report in reports {
        let verdict = if report.validation.valid { "valid" } else { "invalid" };
        writeln!(w, "{}\t{verdict}\t{}", report.tag, reasons(&report.validation))?;
    }
    Ok(())
}

fn write_pretty(reports: &[TagReport], w: &mut dyn Write) -> io::Result<()> {
    for report in reports {
        if report.validation.valid {
            writeln!(w, "ok       {}", report.tag)?;
        } else {
            writeln!(w, "invalid  {:?}  ({})", report.tag, reasons(&report.validation))?;
        }
    }
    Ok(())
}
