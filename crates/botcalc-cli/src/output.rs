//! Output modes and error rendering shared by every command.
//!
//! The mode is picked from, in order:
//! 1. `--format`
//! 2. `--json`
//! 3. `FORMAT` env var, then the user config `output` key (already folded
//!    into [`EffectiveConfig::resolved_output`])
//! 4. Default: pretty if stdout is a TTY, text if piped.
//!
//! [`EffectiveConfig::resolved_output`]: botcalc_core::config::EffectiveConfig

use botcalc_core::PrecalcError;
use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, Write};

pub const PRETTY_RULE_WIDTH: usize = 72;

/// A full-width dashed line.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// A heading underlined with [`pretty_rule`].
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// `key:` padded to a fixed column, then the value.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, aligned keys).
    Pretty,
    /// Tab-separated rows for scripts and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Resolve the output mode from flags and the config-resolved default.
///
/// `resolved` is `None` when config loading failed; errors are then
/// rendered as text unless a flag says otherwise.
pub fn resolve_output_mode(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    resolved: Option<&str>,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }
    if json_flag {
        return OutputMode::Json;
    }
    resolved.and_then(OutputMode::parse).unwrap_or(OutputMode::Text)
}

/// Write `value` to stdout. JSON is generic; the other modes use the
/// command's own renderers.
pub fn render_mode<T: Serialize + ?Sized>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error as shown to the user, with the `E####` code when one applies.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    /// Hint taken from the error code table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    /// Create an error with an error code and an optional suggestion.
    pub fn with_code(
        message: impl Into<String>,
        code: botcalc_core::ErrorCode,
    ) -> Self {
        Self {
            message: message.into(),
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }

    /// Lead with the code's one-line description, then the detail.
    pub fn with_detail(code: botcalc_core::ErrorCode, detail: &str) -> Self {
        Self::with_code(format!("{}: {detail}", code.message()), code)
    }
}

impl From<&PrecalcError> for CliError {
    fn from(err: &PrecalcError) -> Self {
        Self::with_code(err.to_string(), err.code())
    }
}

/// Write an error to stderr; JSON mode wraps it as `{"error": ...}`.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write_error(mode, error, &mut out)?;
    Ok(())
}

fn write_error(mode: OutputMode, error: &CliError, out: &mut dyn Write) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            writeln!(out, "error: {}", error.message)?;
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use botcalc_core::ErrorCode;

    #[test]
    fn format_flag_wins_over_json_and_config() {
        let mode = resolve_output_mode(Some(OutputMode::Text), true, Some("pretty"));
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn json_flag_wins_over_config() {
        let mode = resolve_output_mode(None, true, Some("pretty"));
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn config_value_is_used_case_insensitively() {
        assert_eq!(resolve_output_mode(None, false, Some("PRETTY")), OutputMode::Pretty);
        assert_eq!(resolve_output_mode(None, false, Some("json")), OutputMode::Json);
    }

    #[test]
    fn unknown_or_missing_config_is_text() {
        assert_eq!(resolve_output_mode(None, false, Some("fancy")), OutputMode::Text);
        assert_eq!(resolve_output_mode(None, false, None), OutputMode::Text);
    }

    #[test]
    fn precalc_errors_carry_code_and_hint() {
        let err = CliError::from(&PrecalcError::UnknownBot("ghost".into()));
        assert_eq!(err.error_code.as_deref(), Some(ErrorCode::UnknownBot.code()));
        assert!(err.message.contains("ghost"));
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn json_errors_are_wrapped() {
        let err = CliError::with_code("boom", ErrorCode::InternalUnexpected);
        let mut buf = Vec::new();
        write_error(OutputMode::Json, &err, &mut buf).expect("write");
        let json: serde_json::Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(json["error"]["message"], "boom");
        assert_eq!(json["error"]["error_code"], "E9001");
    }

    #[test]
    fn detail_follows_code_description() {
        let err = CliError::with_detail(ErrorCode::ConfigParseError, "Failed to parse c.toml");
        assert_eq!(err.message, "Could not parse the config file: Failed to parse c.toml");
        assert_eq!(err.error_code.as_deref(), Some("E1001"));
    }

    #[test]
    fn text_errors_show_suggestion() {
        let err = CliError::with_code("bad", ErrorCode::DuplicateBot);
        let mut buf = Vec::new();
        write_error(OutputMode::Text, &err, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("error: bad"));
        assert!(text.contains("suggestion:"));
    }
}
