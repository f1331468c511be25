//! Layered runtime configuration.
//!
//! Precedence, lowest to highest: built-in defaults, `synapse.toml` (or
//! `config/synapse.toml`), `SYNAPSE_*` environment variables, then explicit
//! [`ConfigOverrides`] from the caller. The merged result is validated once
//! and a failure stops startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::BreakerConfig;

const ENV_PREFIX: &str = "SYNAPSE_";
const DEFAULT_CONFIG_FILE: &str = "synapse.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub breaker: BreakerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    /// Upper bound for a single provider call.
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Hosted providers authenticate with an API key; a local Ollama does not.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://synapse.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            breaker: BreakerConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => read_patch(&path)?.apply(&mut config),
            None if options.require_file => {
                return Err(ConfigError::MissingConfigFile(
                    options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
                ));
            }
            None => {}
        }

        config.apply_env(&EnvSource)?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_env(&mut self, env: &EnvSource) -> Result<(), ConfigError> {
        let database = &mut self.database;
        merge(&mut database.url, env.text("DATABASE_URL"));
        merge(&mut database.max_connections, env.parsed("DATABASE_MAX_CONNECTIONS")?);
        merge(&mut database.timeout_secs, env.parsed("DATABASE_TIMEOUT_SECS")?);

        let llm = &mut self.llm;
        if let Some(raw) = env.text("LLM_PROVIDER") {
            llm.provider = raw.parse()?;
        }
        merge(&mut llm.api_key, env.text("LLM_API_KEY").map(|key| Some(SecretString::from(key))));
        merge(&mut llm.base_url, env.text("LLM_BASE_URL").map(Some));
        merge(&mut llm.model, env.text("LLM_MODEL"));
        merge(&mut llm.timeout_secs, env.parsed("LLM_TIMEOUT_SECS")?);

        merge(&mut self.breaker.failure_threshold, env.parsed("BREAKER_FAILURE_THRESHOLD")?);
        merge(&mut self.breaker.cooldown_secs, env.parsed("BREAKER_COOLDOWN_SECS")?);

        let server = &mut self.server;
        merge(&mut server.bind_address, env.text("SERVER_BIND_ADDRESS"));
        merge(&mut server.port, env.parsed("SERVER_PORT")?);
        merge(&mut server.graceful_shutdown_secs, env.parsed("SERVER_GRACEFUL_SHUTDOWN_SECS")?);

        // The short LOG_* spellings are accepted as aliases.
        merge(&mut self.logging.level, env.text("LOGGING_LEVEL").or_else(|| env.text("LOG_LEVEL")));
        if let Some(raw) = env.text("LOGGING_FORMAT").or_else(|| env.text("LOG_FORMAT")) {
            self.logging.format = raw.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.llm.provider, overrides.llm_provider);
        merge(&mut self.llm.model, overrides.llm_model);
        merge(&mut self.llm.api_key, overrides.llm_api_key.map(|key| Some(SecretString::from(key))));
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_database()?;
        self.validate_llm()?;
        self.validate_breaker()?;
        self.validate_server()?;
        self.validate_logging()
    }

    fn validate_database(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        require(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        require(self.database.max_connections > 0, "database.max_connections must be greater than zero")?;
        require(
            (1..=300).contains(&self.database.timeout_secs),
            "database.timeout_secs must be in range 1..=300",
        )
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;
        require((1..=300).contains(&llm.timeout_secs), "llm.timeout_secs must be in range 1..=300")?;
        require(!llm.model.trim().is_empty(), "llm.model must not be empty")?;

        if llm.provider.requires_api_key() {
            let has_key =
                llm.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
            require(
                has_key,
                "llm.api_key is required for openai/anthropic providers (set SYNAPSE_LLM_API_KEY)",
            )?;
        } else {
            let has_base_url = llm.base_url.as_deref().is_some_and(|url| !url.trim().is_empty());
            require(has_base_url, "llm.base_url is required for ollama provider")?;
        }

        match llm.base_url.as_deref() {
            Some(url) => require(
                url.starts_with("http://") || url.starts_with("https://"),
                "llm.base_url must start with http:// or https://",
            ),
            None => Ok(()),
        }
    }

    fn validate_breaker(&self) -> Result<(), ConfigError> {
        require(
            self.breaker.failure_threshold > 0,
            "breaker.failure_threshold must be greater than zero",
        )?;
        require(
            (1..=3600).contains(&self.breaker.cooldown_secs),
            "breaker.cooldown_secs must be in range 1..=3600",
        )
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require(self.server.port > 0, "server.port must be greater than zero")?;
        require(
            self.server.graceful_shutdown_secs > 0,
            "server.graceful_shutdown_secs must be greater than zero",
        )
    }

    fn validate_logging(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.trim().to_ascii_lowercase();
        require(
            matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
            "logging.level must be one of trace|debug|info|warn|error",
        )
    }
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

/// Reads `SYNAPSE_`-prefixed variables. Blank values count as unset.
struct EnvSource;

impl EnvSource {
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    fn text(&self, name: &str) -> Option<String> {
        env::var(Self::key(name)).ok().filter(|value| !value.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        let Some(raw) = self.text(name) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvOverride { key: Self::key(name), value: raw })
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str::<ConfigPatch>(&interpolate_env_vars(&raw)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${NAME}` references from the process environment. Secrets can
/// then live outside the file.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut pieces = input.split("${");
    let mut output = pieces.next().unwrap_or_default().to_string();

    for piece in pieces {
        let (name, rest) = piece.split_once('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        output.push_str(&value);
        output.push_str(rest);
    }

    Ok(output)
}

/// File-level view of the config: every field optional so a file only needs
/// the settings it changes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigPatch {
    database: DatabasePatch,
    llm: LlmPatch,
    breaker: BreakerPatch,
    server: ServerPatch,
    logging: LoggingPatch,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BreakerPatch {
    failure_threshold: Option<u32>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl ConfigPatch {
    fn apply(self, config: &mut AppConfig) {
        let ConfigPatch { database, llm, breaker, server, logging } = self;

        merge(&mut config.database.url, database.url);
        merge(&mut config.database.max_connections, database.max_connections);
        merge(&mut config.database.timeout_secs, database.timeout_secs);

        merge(&mut config.llm.provider, llm.provider);
        merge(&mut config.llm.api_key, llm.api_key.map(|key| Some(SecretString::from(key))));
        merge(&mut config.llm.base_url, llm.base_url.map(Some));
        merge(&mut config.llm.model, llm.model);
        merge(&mut config.llm.timeout_secs, llm.timeout_secs);

        merge(&mut config.breaker.failure_threshold, breaker.failure_threshold);
        merge(&mut config.breaker.cooldown_secs, breaker.cooldown_secs);

        merge(&mut config.server.bind_address, server.bind_address);
        merge(&mut config.server.port, server.port);
        merge(&mut config.server.graceful_shutdown_secs, server.graceful_shutdown_secs);

        merge(&mut config.logging.level, logging.level);
        merge(&mut config.logging.format, logging.format);
    }
}
