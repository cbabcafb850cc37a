#![forbid(unsafe_code)]

mod cmd;
mod output;

use botcalc_core::config::{self, EffectiveConfig};
use botcalc_core::{ErrorCode, PrecalcError};
use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "botcalc: reactive formula runtime for bot state",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Runtime config file (default: .botcalc/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Precalculate a state file",
        long_about = "Load a bot state file, compute every tag, and print the computed values.",
        after_help = "EXAMPLES:\n    # Print every computed value\n    botcalc eval state.json\n\n    # One bot, machine-readable\n    botcalc eval state.json --bot b1 --json"
    )]
    Eval(cmd::eval::EvalArgs),

    #[command(
        about = "Replay a change script",
        long_about = "Load a bot state file, replay a JSON-lines change script batch by batch, and print each state update.",
        after_help = "EXAMPLES:\n    # Replay changes\n    botcalc apply state.json changes.jsonl\n\n    # Emit machine-readable output\n    botcalc apply state.json changes.jsonl --json"
    )]
    Apply(cmd::apply::ApplyArgs),

    #[command(
        about = "Parse a filter tag",
        after_help = "EXAMPLES:\n    botcalc filter 'onClick(#color:\"red\")'"
    )]
    Filter(cmd::filter::FilterArgs),

    #[command(
        about = "Validate tag names",
        long_about = "Validate tag names. Exits non-zero when any tag is invalid.",
        after_help = "EXAMPLES:\n    botcalc validate color 'onClick(#color:\"red\")'"
    )]
    Validate(cmd::validate::ValidateArgs),

    #[command(
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    botcalc completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BOTCALC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "botcalc=debug,botcalc_core=debug,info"
        } else {
            "botcalc=info,botcalc_core=info,warn"
        })
    });

    let format = env::var("BOTCALC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Map a command failure onto a structured CLI error.
fn classify(err: &anyhow::Error) -> CliError {
    if let Some(precalc) = err.downcast_ref::<PrecalcError>() {
        return CliError::from(precalc);
    }
    CliError::with_detail(ErrorCode::InternalUnexpected, &format!("{err:#}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = std::env::current_dir()?;
    let effective: EffectiveConfig =
        match config::resolve_config(&project_root, cli.config.as_deref(), cli.json) {
            Ok(effective) => effective,
            Err(err) => {
                let output = output::resolve_output_mode(cli.format, cli.json, None);
                let error = CliError::with_detail(ErrorCode::ConfigParseError, &format!("{err:#}"));
                output::render_error(output, &error)?;
                std::process::exit(2);
            }
        };
    let output = output::resolve_output_mode(cli.format, cli.json, Some(&effective.resolved_output));
    let runtime = effective.runtime;

    let result = match &cli.command {
        Commands::Eval(args) => cmd::eval::run_eval(args, runtime, output),
        Commands::Apply(args) => cmd::apply::run_apply(args, runtime, output),
        Commands::Filter(args) => cmd::filter::run_filter(args, output),
        Commands::Validate(args) => match cmd::validate::run_validate(args, output) {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(err) => Err(err),
        },
        Commands::Completions(args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    };

    if let Err(err) = result {
        output::render_error(output, &classify(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
