use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use synapse_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

struct ConfigSource {
    path: Option<PathBuf>,
    document: Option<Value>,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    CommandResult::success("config", render(&config))
}

/// One line per effective setting with where it came from. Secrets never
/// leave this function in clear text.
pub fn render(config: &AppConfig) -> String {
    let path = detect_config_path();
    let document = load_config_file_doc(path.as_deref());
    let source = ConfigSource { path, document };

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let entries: Vec<(&str, String)> = vec![
        ("database.url", redact_url(&config.database.url)),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("llm.provider", config.llm.provider.as_str().to_string()),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", api_key),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("breaker.failure_threshold", config.breaker.failure_threshold.to_string()),
        ("breaker.cooldown_secs", config.breaker.cooldown_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, value)| render_line(key, &value, field_source(key, &source))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("synapse.toml"), PathBuf::from("config/synapse.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn env_key(key_path: &str) -> String {
    format!("SYNAPSE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn field_source(key_path: &str, source: &ConfigSource) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = source.document.as_ref() {
        if contains_path(doc, key_path) {
            let file_path = source
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a provider prefix such as `sk-` so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{env_key, redact_secret, redact_url};

    #[test]
    fn env_keys_follow_the_config_path() {
        assert_eq!(env_key("llm.api_key"), "SYNAPSE_LLM_API_KEY");
        assert_eq!(env_key("breaker.cooldown_secs"), "SYNAPSE_BREAKER_COOLDOWN_SECS");
    }

    #[test]
    fn secrets_keep_only_their_prefix() {
        assert_eq!(redact_secret("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_secret("plainsecret"), "<redacted>");
        assert_eq!(redact_secret("   "), "<empty>");
    }

    #[test]
    fn url_credentials_are_masked() {
        assert_eq!(redact_url("postgres://user:pw@db:5432/app"), "postgres://***@db:5432/app");
        assert_eq!(redact_url("sqlite://synapse.db"), "sqlite://synapse.db");
        assert_eq!(redact_url("sqlite::memory:"), "sqlite::memory:");
    }
}
