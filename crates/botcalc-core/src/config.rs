use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::Path;

use crate::sandbox::DEFAULT_MAX_STEPS;

/// Environment variable that forces formula error logging on or off.
pub const LOG_FORMULA_ERRORS_ENV: &str = "BOTCALC_LOG_FORMULA_ERRORS";

/// Knobs for one precalculation runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Also emit every formula evaluation error as a `warn!` event.
    #[serde(default)]
    pub log_formula_errors: bool,
    /// Maximum nesting of formula evaluations before a `RangeError`.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Interpreter step budget per evaluation before a `RangeError`.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_formula_errors: false,
            max_depth: default_max_depth(),
            max_steps: default_max_steps(),
        }
    }
}

impl RuntimeConfig {
    /// Apply environment overrides on top of file values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(flag) = env::var(LOG_FORMULA_ERRORS_ENV).ok().as_deref().and_then(parse_flag) {
            self.log_formula_errors = flag;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub runtime: RuntimeConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

pub fn load_project_config(project_root: &Path) -> Result<RuntimeConfig> {
    load_config_file(&project_root.join(".botcalc/config.toml"))
}

/// Load a runtime config file; a missing file yields defaults.
pub fn load_config_file(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<RuntimeConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("botcalc/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve runtime and output settings. `config_path` replaces the
/// project file lookup when given.
pub fn resolve_config(
    project_root: &Path,
    config_path: Option<&Path>,
    cli_json: bool,
) -> Result<EffectiveConfig> {
    let runtime = match config_path {
        Some(path) => load_config_file(path)?,
        None => load_project_config(project_root)?,
    }
    .with_env_overrides();
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.clone(), env_format);

    Ok(EffectiveConfig {
        runtime,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

const fn default_max_depth() -> usize {
    64
}

const fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg, RuntimeConfig::default());
        assert!(!cfg.log_formula_errors);
        assert_eq!(cfg.max_depth, 64);
        assert_eq!(cfg.max_steps, 100_000);
    }

    #[test]
    fn partial_project_config_keeps_other_defaults() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        std::fs::create_dir_all(root.path().join(".botcalc")).expect("create .botcalc");
        std::fs::write(
            root.path().join(".botcalc/config.toml"),
            "log_formula_errors = true\nmax_depth = 8\n",
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert!(cfg.log_formula_errors);
        assert_eq!(cfg.max_depth, 8);
        assert_eq!(cfg.max_steps, 100_000);
    }

    #[test]
    fn invalid_config_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "max_depth = \"deep\"").expect("write config");

        let err = load_config_file(&path).expect_err("parse should fail");
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        let output = resolve_output(true, Some("pretty".to_string()), Some("text".to_string()));
        assert_eq!(output, "json");
    }

    #[test]
    fn env_format_beats_user_config() {
        let output = resolve_output(false, Some("pretty".to_string()), Some("TEXT".to_string()));
        assert_eq!(output, "text");
    }

    #[test]
    fn flags_parse_loosely() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag(" yes "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
