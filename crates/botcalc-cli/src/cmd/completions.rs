//! `botcalc completions` — shell completion scripts.

use anyhow::Result;
use clap::Args;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run_completions(shell: Shell, command: &mut clap::Command) -> Result<()> {
    let stdout = io::stdout();
    write_completions(shell, command, &mut stdout.lock())?;
    Ok(())
}

fn write_completions(shell: Shell, command: &mut clap::Command, out: &mut dyn Write) -> io::Result<()> {
    generate(shell, command, "botcalc", out);
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_name_the_binary() {
        let mut command = clap::Command::new("botcalc").subcommand(clap::Command::new("eval"));
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let mut buf = Vec::new();
            write_completions(shell, &mut command, &mut buf).expect("generate");
            let script = String::from_utf8(buf).expect("utf8");
            assert!(script.contains("botcalc"), "{shell}: {script}");
        }
    }
}
