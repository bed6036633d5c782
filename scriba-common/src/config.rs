//! Configuration loading and resolution
//!
//! Settings come from a single TOML file. The file is located with this
//! priority order:
//! 1. Explicit path (command-line argument)
//! 2. `SCRIBA_CONFIG` environment variable
//! 3. `<config dir>/scriba/config.toml` (e.g. `~/.config/scriba/config.toml`)
//! 4. Built-in defaults
//!
//! A missing configuration file is never fatal: defaults are used and a
//! warning is logged. String values of the form `${VAR}` are replaced with the
//! value of the environment variable `VAR` when it is set.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "SCRIBA_CONFIG";

/// Environment variable holding the generative model API key
pub const API_KEY_ENV_VAR: &str = "GOOGLE_API_KEY";

/// Complete scriba configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScribaConfig {
    pub llm: LlmConfig,
    pub planner: PlannerConfig,
    pub generation: GenerationConfig,
    pub tutor: TutorConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// Generative model access: endpoint model, rate limit and retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key (usually `${GOOGLE_API_KEY}`); the environment variable wins
    pub api_key: Option<String>,
    /// Default model for every operation
    pub model_name: String,
    /// Maximum requests per minute across the whole session
    pub rpm: u32,
    /// Attempts per request before giving up (1 = no retry)
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub writer: ModelOverrides,
    pub editor: ModelOverrides,
    pub tutor: ModelOverrides,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: "gemini-2.0-flash-exp".to_string(),
            rpm: 5,
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            request_timeout_secs: 300,
            writer: ModelOverrides::default(),
            editor: ModelOverrides::default(),
            tutor: ModelOverrides::default(),
        }
    }
}

/// Per-operation sampling overrides as they appear in the file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelOverrides {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// Operation a model request is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Incremental document generation
    Writer,
    /// Region rewrite
    Editor,
    /// Question answering
    Tutor,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Self::Writer => "writer",
            Self::Editor => "editor",
            Self::Tutor => "tutor",
        }
    }
}

/// Fully resolved model settings for one operation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub model_name: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl LlmConfig {
    /// Resolve the model profile for an operation
    ///
    /// Unset overrides fall back to per-operation defaults: the writer is
    /// moderately creative with a large output window, the editor is strict,
    /// the tutor is conversational.
    pub fn profile(&self, operation: Operation) -> ModelProfile {
        let (overrides, temperature, top_p, top_k, max_output_tokens) = match operation {
            Operation::Writer => (&self.writer, 0.5, 0.8, 40, 45_000),
            Operation::Editor => (&self.editor, 0.3, 0.8, 30, 8_000),
            Operation::Tutor => (&self.tutor, 0.75, 0.9, 50, 4_000),
        };

        ModelProfile {
            model_name: overrides
                .model_name
                .clone()
                .unwrap_or_else(|| self.model_name.clone()),
            temperature: overrides.temperature.unwrap_or(temperature),
            top_p: overrides.top_p.unwrap_or(top_p),
            top_k: overrides.top_k.unwrap_or(top_k),
            max_output_tokens: overrides.max_output_tokens.unwrap_or(max_output_tokens),
        }
    }
}

/// Unit size metric used by the chunk planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMetricKind {
    /// Whitespace-separated words of text plus a fixed cost per image
    Words,
    /// Every evidence item costs one
    Items,
}

/// Generation unit planning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub size_metric: SizeMetricKind,
    /// Maximum estimated size of one generation unit
    pub unit_budget: usize,
    /// Size charged for each keyframe under the `words` metric
    pub image_cost: usize,
    /// Close a unit once its recorded time span reaches this many seconds
    pub max_unit_duration_sec: Option<f64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            size_metric: SizeMetricKind::Words,
            unit_budget: 6_000,
            image_cost: 250,
            max_unit_duration_sec: Some(900.0),
        }
    }
}

/// Document generation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Characters of already generated text handed to the next request
    pub context_tail_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            context_tail_chars: 4_000,
        }
    }
}

/// Question answering
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// Size budget (planner units) of evidence sent with one question
    pub context_budget: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            context_budget: 12_000,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding prompt override files
    pub prompts_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ScribaConfig {
    /// Parse configuration text, resolve `${VAR}` placeholders and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut value: toml::Value = content
            .parse::<toml::Table>()
            .map(toml::Value::Table)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

        resolve_env_placeholders(&mut value);

        let config: ScribaConfig = value
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read {} failed: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Locate and load configuration following the priority order
    ///
    /// An explicitly named file (argument or environment) must exist; the
    /// per-user default file is optional.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            return Self::load_file(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::load_file(Path::new(&path));
            }
        }

        // Priority 3: Per-user config file
        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load_file(&path);
            }
        }

        // Priority 4: Built-in defaults
        warn!("No configuration file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.llm.rpm == 0 {
            return Err(Error::Config("llm.rpm must be greater than 0".to_string()));
        }
        if self.llm.max_attempts == 0 {
            return Err(Error::Config(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.planner.unit_budget == 0 {
            return Err(Error::Config(
                "planner.unit_budget must be greater than 0".to_string(),
            ));
        }
        if let Some(secs) = self.planner.max_unit_duration_sec {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(Error::Config(format!(
                    "planner.max_unit_duration_sec must be positive, got {}",
                    secs
                )));
            }
        }
        Ok(())
    }

    /// API key for the generative model
    ///
    /// `GOOGLE_API_KEY` is read at call time so it can be exported after the
    /// configuration was loaded. Unresolved `${VAR}` placeholders count as unset.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV_VAR) {
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Some(key);
            }
        }

        self.llm
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && !k.starts_with("${"))
    }
}

/// Default per-user configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scriba").join("config.toml"))
}

/// Replace `${VAR}` string values with environment values, recursively
///
/// Unknown variables leave the placeholder untouched.
fn resolve_env_placeholders(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                if let Ok(resolved) = std::env::var(name) {
                    *s = resolved;
                }
            }
        }
        toml::Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                resolve_env_placeholders(v);
            }
        }
        toml::Value::Array(items) => {
            for v in items.iter_mut() {
                resolve_env_placeholders(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = ScribaConfig::from_toml_str("").unwrap();
        assert_eq!(config.llm.rpm, 5);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.planner.size_metric, SizeMetricKind::Words);
        assert_eq!(config.planner.max_unit_duration_sec, Some(900.0));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_profile_overrides_fall_back_per_operation() {
        let config = ScribaConfig::from_toml_str(
            r#"
            [llm]
            model_name = "base-model"

            [llm.editor]
            temperature = 0.1
            model_name = "strict-model"
            "#,
        )
        .unwrap();

        let editor = config.llm.profile(Operation::Editor);
        assert_eq!(editor.model_name, "strict-model");
        assert_eq!(editor.temperature, 0.1);
        assert_eq!(editor.max_output_tokens, 8_000);

        let tutor = config.llm.profile(Operation::Tutor);
        assert_eq!(tutor.model_name, "base-model");
        assert_eq!(tutor.temperature, 0.75);
    }

    #[test]
    fn test_items_metric_parses() {
        let config = ScribaConfig::from_toml_str(
            r#"
            [planner]
            size_metric = "items"
            unit_budget = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.planner.size_metric, SizeMetricKind::Items);
        assert_eq!(config.planner.unit_budget, 2);
    }

    #[test]
    fn test_validation_rejects_zero_rpm() {
        let err = ScribaConfig::from_toml_str("[llm]\nrpm = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_rejects_negative_duration() {
        let err =
            ScribaConfig::from_toml_str("[planner]\nmax_unit_duration_sec = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("max_unit_duration_sec"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = ScribaConfig::from_toml_str("[llm\nrpm = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
