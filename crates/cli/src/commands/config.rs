use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use maimai_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_doc.as_ref(), config_file_path.as_deref())
}

/// Renders every effective setting with the layer it came from. Secrets are
/// reduced to a short prefix.
pub fn render(config: &AppConfig, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    let secondary_key = config.llm.secondary_api_key.as_ref().map(redact_secret);
    let rows = vec![
        row(
            "channel.bot_token",
            redact_secret(&config.channel.bot_token),
            &["MAIMAI_CHANNEL_BOT_TOKEN"],
        ),
        row(
            "channel.bot_id",
            optional(config.channel.bot_id.as_deref()),
            &["MAIMAI_CHANNEL_BOT_ID"],
        ),
        row(
            "channel.excluded_bot_ids",
            config.channel.excluded_bot_ids.join(","),
            &["MAIMAI_CHANNEL_EXCLUDED_BOT_IDS"],
        ),
        row("llm.api_key", redact_secret(&config.llm.api_key), &["MAIMAI_LLM_API_KEY"]),
        row("llm.base_url", config.llm.base_url.clone(), &["MAIMAI_LLM_BASE_URL"]),
        row("llm.model", config.llm.model.clone(), &["MAIMAI_LLM_MODEL"]),
        row(
            "llm.secondary_api_key",
            optional(secondary_key.as_deref()),
            &["MAIMAI_LLM_SECONDARY_API_KEY"],
        ),
        row(
            "llm.secondary_model",
            optional(config.llm.secondary_model.as_deref()),
            &["MAIMAI_LLM_SECONDARY_MODEL"],
        ),
        row(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["MAIMAI_LLM_TIMEOUT_SECS", "MAIMAI_REQUEST_TIMEOUT"],
        ),
        row("llm.max_retries", config.llm.max_retries.to_string(), &["MAIMAI_LLM_MAX_RETRIES"]),
        row(
            "session.wake_timeout_secs",
            config.session.wake_timeout_secs.to_string(),
            &["MAIMAI_SESSION_WAKE_TIMEOUT_SECS", "MAIMAI_WAKE_TIMEOUT"],
        ),
        row(
            "session.wake_words",
            config.session.wake_words.join(","),
            &["MAIMAI_SESSION_WAKE_WORDS"],
        ),
        row(
            "session.random_join_probability",
            config.session.random_join_probability.to_string(),
            &["MAIMAI_SESSION_RANDOM_JOIN_PROBABILITY"],
        ),
        row(
            "admission.initial_limit",
            config.admission.initial_limit.to_string(),
            &["MAIMAI_ADMISSION_INITIAL_LIMIT", "MAIMAI_MAX_CONCURRENCY"],
        ),
        row(
            "admission.min_limit",
            config.admission.min_limit.to_string(),
            &["MAIMAI_ADMISSION_MIN_LIMIT"],
        ),
        row(
            "admission.max_limit",
            config.admission.max_limit.to_string(),
            &["MAIMAI_ADMISSION_MAX_LIMIT"],
        ),
        row(
            "pipeline.deadline_secs",
            config.pipeline.deadline_secs.to_string(),
            &["MAIMAI_PIPELINE_DEADLINE_SECS"],
        ),
        row(
            "pipeline.stage_timeout_secs",
            config.pipeline.stage_timeout_secs.to_string(),
            &["MAIMAI_PIPELINE_STAGE_TIMEOUT_SECS"],
        ),
        row(
            "pipeline.max_history",
            config.pipeline.max_history.to_string(),
            &["MAIMAI_PIPELINE_MAX_HISTORY", "MAIMAI_MAX_HISTORY"],
        ),
        row(
            "storage.data_dir",
            config.storage.data_dir.display().to_string(),
            &["MAIMAI_STORAGE_DATA_DIR"],
        ),
        row("database.enabled", config.database.enabled.to_string(), &["MAIMAI_DATABASE_ENABLED"]),
        row("database.url", config.database.url.clone(), &["MAIMAI_DATABASE_URL"]),
        row(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["MAIMAI_SERVER_BIND_ADDRESS"],
        ),
        row(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["MAIMAI_SERVER_HEALTH_CHECK_PORT"],
        ),
        row(
            "logging.level",
            config.logging.level.clone(),
            &["MAIMAI_LOGGING_LEVEL", "MAIMAI_LOG_LEVEL"],
        ),
        row(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["MAIMAI_LOGGING_FORMAT", "MAIMAI_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Row { key, value, env_keys } in rows {
        lines.push(render_line(key, &value, field_source(key, env_keys, file_doc, file_path)));
    }
    lines.join("\n")
}

struct Row {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn row(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Row {
    Row { key, value, env_keys }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("maimai.toml"), PathBuf::from("config/maimai.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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

fn optional(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        if prefix.len() <= 4 {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}
