use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use relay_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", Some("RELAY_DATABASE_URL")),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", Some("RELAY_DATABASE_MAX_CONNECTIONS")),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", Some("RELAY_DATABASE_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", Some("RELAY_LLM_PROVIDER")),
    ));
    lines.push(render_line("llm.model", &config.llm.model, source("llm.model", Some("RELAY_LLM_MODEL"))));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", Some("RELAY_LLM_BASE_URL")),
    ));
    let llm_api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    lines.push(render_line("llm.api_key", &llm_api_key, source("llm.api_key", Some("RELAY_LLM_API_KEY"))));
    lines.push(render_line(
        "llm.request_timeout_seconds",
        &config.llm.request_timeout_seconds.to_string(),
        source("llm.request_timeout_seconds", Some("RELAY_LLM_REQUEST_TIMEOUT_SECONDS")),
    ));
    lines.push(render_line(
        "llm.max_concurrent",
        &config.llm.max_concurrent.to_string(),
        source("llm.max_concurrent", Some("RELAY_LLM_MAX_CONCURRENT")),
    ));

    lines.push(render_line(
        "registry.sync_interval_seconds",
        &config.registry.sync_interval_seconds.to_string(),
        source("registry.sync_interval_seconds", Some("RELAY_REGISTRY_SYNC_INTERVAL_SECONDS")),
    ));
    lines.push(render_line(
        "history.window",
        &config.history.window.to_string(),
        source("history.window", Some("RELAY_HISTORY_WINDOW")),
    ));

    lines.push(render_line(
        "guardrails.default_policy.enabled",
        &config.guardrails.default_policy.enabled.to_string(),
        source("guardrails.default_policy", None),
    ));
    lines.push(render_line(
        "guardrails.default_policy.keywords",
        &format!("{} entries", config.guardrails.default_policy.keywords.len()),
        source("guardrails.default_policy", None),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", Some("RELAY_SERVER_BIND_ADDRESS")),
    ));
    lines.push(render_line(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        source("server.health_check_port", Some("RELAY_SERVER_HEALTH_CHECK_PORT")),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("RELAY_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("RELAY_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("relay.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/relay.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
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
