//! Runner configuration: optional TOML file plus environment overrides.
//!
//! Resolved once at startup into an immutable [`RunnerConfig`] that is passed
//! by reference to every component.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file, looked up in the workspace root.
pub const DEFAULT_CONFIG_FILE: &str = ".vibe-runner.toml";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Model backend family. Both speak the OpenAI chat-completions dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Qwen,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Qwen => "qwen",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4.1-mini",
            Provider::Qwen => "qwen3-max",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "qwen" => Ok(Provider::Qwen),
            other => Err(anyhow!("unknown provider '{other}' (expected openai or qwen)")),
        }
    }
}

/// Runner configuration (TOML).
///
/// Missing fields default to the values below.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub provider: Provider,
    /// Empty means the provider's default model.
    pub model: String,
    pub base_url: String,
    /// Usually supplied through `API_KEY` / `OPENAI_API_KEY` instead.
    pub api_key: Option<String>,

    /// Upper bound on accepted steps per run.
    pub max_steps: u32,
    /// Corrective re-prompts allowed for a single step before giving up.
    pub max_soft_retries: u32,

    /// Wall-clock limit for one shell command.
    pub cmd_timeout_secs: u64,
    /// Trailing window of command output kept for history.
    pub output_limit_bytes: usize,
    /// Trailing window echoed to the console.
    pub preview_chars: usize,

    pub request_timeout_secs: u64,
    /// Additional attempts after the first failed model request.
    pub max_llm_retries: u32,
    pub retry_base_delay_ms: u64,

    pub task_path: PathBuf,
    pub log_dir: PathBuf,
    pub instructions_path: PathBuf,
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_steps", &self.max_steps)
            .field("max_soft_retries", &self.max_soft_retries)
            .field("cmd_timeout_secs", &self.cmd_timeout_secs)
            .field("output_limit_bytes", &self.output_limit_bytes)
            .field("preview_chars", &self.preview_chars)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_llm_retries", &self.max_llm_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("task_path", &self.task_path)
            .field("log_dir", &self.log_dir)
            .field("instructions_path", &self.instructions_path)
            .finish()
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            max_steps: 30,
            max_soft_retries: 10,
            cmd_timeout_secs: 20,
            output_limit_bytes: 6000,
            preview_chars: 1200,
            request_timeout_secs: 60,
            max_llm_retries: 2,
            retry_base_delay_ms: 1000,
            task_path: PathBuf::from("TASK.md"),
            log_dir: PathBuf::from("logs"),
            instructions_path: PathBuf::from("Agent.md"),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.cmd_timeout_secs == 0 {
            return Err(anyhow!("cmd_timeout_secs must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.preview_chars == 0 {
            return Err(anyhow!("preview_chars must be > 0"));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must not be empty"));
        }
        if self.task_path.as_os_str().is_empty() {
            return Err(anyhow!("task_path must not be empty"));
        }
        Ok(())
    }

    /// Apply the environment overrides (`PROVIDER`, `MODEL`, `BASE_URL`,
    /// `API_KEY`/`OPENAI_API_KEY`, `MAX_STEPS`, `CMD_TIMEOUT`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(provider) = get("PROVIDER") {
            self.provider = provider.parse().context("parse PROVIDER")?;
        }
        if let Some(model) = get("MODEL") {
            self.model = model;
        }
        if let Some(base_url) = get("BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(key) = get("API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(steps) = get("MAX_STEPS") {
            self.max_steps = steps
                .parse()
                .with_context(|| format!("parse MAX_STEPS '{steps}'"))?;
        }
        if let Some(timeout) = get("CMD_TIMEOUT") {
            self.cmd_timeout_secs = timeout
                .parse()
                .with_context(|| format!("parse CMD_TIMEOUT '{timeout}'"))?;
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() {
            self.provider.default_model()
        } else {
            model
        }
    }

    /// Base URL actually used for requests. Qwen is always routed to DashScope.
    pub fn endpoint_base(&self) -> &str {
        let base = self.base_url.trim().trim_end_matches('/');
        if self.provider == Provider::Qwen && !base.contains("dashscope.aliyuncs.com") {
            return DASHSCOPE_BASE_URL;
        }
        base
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_secs(self.cmd_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Task document path as used in git pathspecs.
    pub fn task_pathspec(&self) -> String {
        self.task_path.to_string_lossy().into_owned()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        return Ok(RunnerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// File, then process environment, then validation.
pub fn resolve_config(path: &Path) -> Result<RunnerConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env(|name| std::env::var(name).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
        cfg.validate().expect("default validates");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_steps = 5\nprovider = \"qwen\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 5);
        assert_eq!(cfg.provider, Provider::Qwen);
        assert_eq!(cfg.cmd_timeout_secs, 20);
        assert_eq!(cfg.model(), "qwen3-max");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = RunnerConfig::default();
        cfg.apply_env(env(&[
            ("MODEL", "gpt-x"),
            ("MAX_STEPS", "7"),
            ("CMD_TIMEOUT", "3"),
            ("OPENAI_API_KEY", "sk-fallback"),
        ]))
        .expect("apply");
        assert_eq!(cfg.model(), "gpt-x");
        assert_eq!(cfg.max_steps, 7);
        assert_eq!(cfg.cmd_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.api_key(), Some("sk-fallback"));
    }

    #[test]
    fn api_key_takes_precedence_over_openai_api_key() {
        let mut cfg = RunnerConfig::default();
        cfg.apply_env(env(&[("API_KEY", "primary"), ("OPENAI_API_KEY", "other")]))
            .expect("apply");
        assert_eq!(cfg.api_key(), Some("primary"));
    }

    #[test]
    fn invalid_env_numbers_are_errors() {
        let mut cfg = RunnerConfig::default();
        let err = cfg
            .apply_env(env(&[("MAX_STEPS", "many")]))
            .expect_err("should fail");
        assert!(format!("{err:#}").contains("MAX_STEPS"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut cfg = RunnerConfig::default();
        assert!(cfg.apply_env(env(&[("PROVIDER", "acme")])).is_err());
    }

    #[test]
    fn qwen_routes_to_dashscope() {
        let cfg = RunnerConfig {
            provider: Provider::Qwen,
            ..RunnerConfig::default()
        };
        assert_eq!(cfg.endpoint_base(), DASHSCOPE_BASE_URL);

        let custom = RunnerConfig {
            base_url: "https://proxy.local/v1/".to_string(),
            ..RunnerConfig::default()
        };
        assert_eq!(custom.endpoint_base(), "https://proxy.local/v1");
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let cfg = RunnerConfig {
            cmd_timeout_secs: 0,
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = RunnerConfig {
            max_steps: 0,
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let cfg = RunnerConfig {
            api_key: Some("sk-secret".to_string()),
            ..RunnerConfig::default()
        };
        let text = format!("{cfg:?}");
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("<redacted>"));
    }
}
