//! Configuration loading.
//!
//! TOML file with `${VAR}` environment references, searched from the
//! working directory first and the user config directory second. Secrets
//! never appear in Debug output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level examline configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExamlineConfig {
    #[serde(default)]
    pub bank: BankConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    /// Directory holding the record-set snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Webhook listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Question bank source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    /// GitHub account hosting the per-subject bank repositories.
    #[serde(default = "default_bank_owner")]
    pub owner: String,
    /// Override for the GitHub API base URL (tests).
    #[serde(default)]
    pub api_base: Option<String>,
    /// Override for the raw-content base URL (tests).
    #[serde(default)]
    pub raw_base: Option<String>,
}

/// Explanation service settings.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Outbound transport settings.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct LineConfig {
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Quiz parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    #[serde(default = "default_questions")]
    pub questions_per_session: usize,
    #[serde(default = "default_quota")]
    pub explanation_quota: u32,
}

fn default_bank_owner() -> String {
    "shaintane".to_string()
}
fn default_questions() -> usize {
    5
}
fn default_quota() -> u32 {
    3
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ExamlineConfig {
    fn default() -> Self {
        Self {
            bank: BankConfig::default(),
            openai: OpenAiConfig::default(),
            line: LineConfig::default(),
            quiz: QuizConfig::default(),
            data_dir: default_data_dir(),
            listen: default_listen(),
        }
    }
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            owner: default_bank_owner(),
            api_base: None,
            raw_base: None,
        }
    }
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            questions_per_session: default_questions(),
            explanation_quota: default_quota(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl std::fmt::Debug for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConfig")
            .field("channel_access_token", &"***")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl std::fmt::Debug for ExamlineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamlineConfig")
            .field("bank", &self.bank)
            .field("openai", &self.openai)
            .field("line", &self.line)
            .field("quiz", &self.quiz)
            .field("data_dir", &self.data_dir)
            .field("listen", &self.listen)
            .finish()
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examline.toml` in the current directory
/// 2. `~/.config/examline/config.toml`
///
/// Environment overrides: `EXAMLINE_OPENAI_KEY`, `EXAMLINE_LINE_TOKEN`.
pub fn load_config() -> Result<ExamlineConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamlineConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("examline.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            global.exists().then_some(global)
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ExamlineConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamlineConfig::default(),
    };

    if let Ok(key) = std::env::var("EXAMLINE_OPENAI_KEY") {
        config.openai.api_key = key;
    }
    if let Ok(token) = std::env::var("EXAMLINE_LINE_TOKEN") {
        config.line.channel_access_token = token;
    }

    config.openai.api_key = resolve_env_vars(&config.openai.api_key);
    config.line.channel_access_token = resolve_env_vars(&config.line.channel_access_token);

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examline"))
}
