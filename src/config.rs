//! Layered configuration loading using figment
//!
//! Sources, highest priority first:
//! 1. `TASKFORGE_*` environment variables, `__` separating sections
//!    (`TASKFORGE_LLM__API_KEY` → `llm.api_key`)
//! 2. `ANTHROPIC_API_KEY`, mapped onto `llm.api_key`
//! 3. The TOML file named by `TASKFORGE_CONFIG`, else `./taskforge.toml`
//! 4. Built-in defaults

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::AgentType;

const DEFAULT_CONFIG_FILE: &str = "taskforge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Configuration section '{section}' is not configured: {reason}")]
    NotConfigured { section: String, reason: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Queue (and system prompt) this worker serves
    pub agent_type: AgentType,
    pub max_iterations: usize,
    /// Blocking pop timeout; each expiry is a heartbeat
    pub poll_timeout_secs: u64,
    /// Pause after a failed task or broker error
    pub backoff_ms: u64,
    pub result_ttl_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            agent_type: AgentType::Code,
            max_iterations: 20,
            poll_timeout_secs: 5,
            backoff_ms: 1000,
            result_ttl_secs: 3600,
        }
    }
}

impl WorkerSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Base directory holding one subdirectory per project
    pub root: PathBuf,
    pub shell_timeout_secs: u64,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspaces"),
            shell_timeout_secs: 120,
        }
    }
}

impl WorkspaceSettings {
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
        }
    }
}

impl LlmSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.is_configured() { "[redacted]" } else { "" };
        f.debug_struct("LlmSettings")
            .field("api_key", &key)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// `redis://host:port[/db]` or `memory://`
    pub url: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSettings {
    pub listen_addr: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// OTLP gRPC endpoint; span export is off when unset
    pub otlp_endpoint: Option<String>,
    /// Emit logs as JSON lines instead of the human format
    pub log_json: bool,
}

impl Config {
    /// Load configuration from defaults, the TOML file and the environment
    ///
    /// Does not read `.env`; see [`Config::load_with_dotenv`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// Load `.env` from the working directory first, then [`Config::load`]
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load()
    }

    /// Build the provider chain; public so tests can layer on top
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let path = std::env::var("TASKFORGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(
                Env::raw()
                    .only(&["ANTHROPIC_API_KEY"])
                    .map(|_| "llm.api_key".into()),
            )
            .merge(Env::prefixed("TASKFORGE_").split("__"))
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.llm.is_configured() {
            return Err(ConfigError::NotConfigured {
                section: "llm".to_string(),
                reason: "set ANTHROPIC_API_KEY or TASKFORGE_LLM__API_KEY".to_string(),
            });
        }
        if self.worker.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.max_iterations".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker.poll_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.poll_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.workspace.shell_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workspace.shell_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.health_addr()?;
        Ok(())
    }

    pub fn health_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.health
            .listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "health.listen_addr".to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_are_correct() {
        let config = Config::default();
        assert_eq!(config.worker.agent_type, AgentType::Code);
        assert_eq!(config.worker.max_iterations, 20);
        assert_eq!(config.worker.poll_timeout(), Duration::from_secs(5));
        assert_eq!(config.worker.result_ttl(), Duration::from_secs(3600));
        assert_eq!(config.workspace.shell_timeout(), Duration::from_secs(120));
        assert!(!config.llm.is_configured());
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn toml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "taskforge.toml",
                r#"
                [worker]
                agent_type = "design"
                max_iterations = 8

                [llm]
                model = "from-file"
                "#,
            )?;
            jail.set_env("TASKFORGE_WORKER__MAX_ITERATIONS", "12");

            let config = Config::load().expect("config loads");
            assert_eq!(config.worker.agent_type, AgentType::Design);
            assert_eq!(config.worker.max_iterations, 12);
            assert_eq!(config.llm.model, "from-file");
            Ok(())
        });
    }

    #[test]
    fn anthropic_key_is_accepted_and_prefixed_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("ANTHROPIC_API_KEY", "sk-plain");
            let config = Config::load().expect("config loads");
            assert_eq!(config.llm.api_key, "sk-plain");

            jail.set_env("TASKFORGE_LLM__API_KEY", "sk-prefixed");
            let config = Config::load().expect("config loads");
            assert_eq!(config.llm.api_key, "sk-prefixed");
            Ok(())
        });
    }

    #[test]
    fn explicit_config_path() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[broker]\nurl = \"memory://\"\n")?;
            jail.set_env("TASKFORGE_CONFIG", "custom.toml");
            let config = Config::load().expect("config loads");
            assert_eq!(config.broker.url, "memory://");
            Ok(())
        });
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotConfigured { .. })
        ));

        config.llm.api_key = "sk".into();
        assert!(config.validate().is_ok());

        config.worker.max_iterations = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "worker.max_iterations"
        ));

        config.worker.max_iterations = 20;
        config.worker.poll_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.worker.poll_timeout_secs = 5;
        config.health.listen_addr = "not an address".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut settings = LlmSettings::default();
        settings.api_key = "sk-secret".into();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[redacted]"));
    }
}
