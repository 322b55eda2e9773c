use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub admission: AdmissionConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub bot_token: SecretString,
    pub bot_id: Option<String>,
    pub excluded_bot_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub secondary_api_key: Option<SecretString>,
    pub secondary_base_url: Option<String>,
    pub secondary_model: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub wake_timeout_secs: u64,
    pub wake_words: Vec<String>,
    pub random_join_probability: f64,
    pub reap_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    pub initial_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub deadline_secs: u64,
    pub stage_timeout_secs: u64,
    pub max_history: usize,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub users_file: String,
    pub knowledge_file: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub bot_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub database_enabled: Option<bool>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
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

impl From<ConfigError> for crate::errors::ApplicationError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig {
                bot_token: String::new().into(),
                bot_id: None,
                excluded_bot_ids: Vec::new(),
            },
            llm: LlmConfig {
                api_key: String::new().into(),
                base_url: "https://api.siliconflow.cn/v1".to_string(),
                model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
                secondary_api_key: None,
                secondary_base_url: None,
                secondary_model: None,
                timeout_secs: 60,
                max_retries: 2,
            },
            session: SessionConfig {
                wake_timeout_secs: 180,
                wake_words: vec!["麦麦".to_string()],
                random_join_probability: 0.1,
                reap_interval_secs: 60,
            },
            admission: AdmissionConfig { initial_limit: 5, min_limit: 1, max_limit: 20 },
            pipeline: PipelineConfig { deadline_secs: 60, stage_timeout_secs: 60, max_history: 20 },
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
                users_file: "users.json".to_string(),
                knowledge_file: "knowledge.json".to_string(),
            },
            database: DatabaseConfig {
                enabled: false,
                url: "sqlite://maimai.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
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

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The secondary endpoint is only used when all three of its fields are set.
    pub fn has_secondary(&self) -> bool {
        self.secondary_api_key.is_some()
            && self.secondary_base_url.is_some()
            && self.secondary_model.is_some()
    }

    /// Model that writes the final reply.
    pub fn generation_model(&self) -> &str {
        match &self.secondary_model {
            Some(model) if self.has_secondary() => model,
            _ => &self.model,
        }
    }
}

impl SessionConfig {
    pub fn wake_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl StorageConfig {
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(&self.users_file)
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join(&self.knowledge_file)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("maimai.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(channel) = patch.channel {
            if let Some(bot_token_value) = channel.bot_token {
                self.channel.bot_token = secret_value(bot_token_value);
            }
            if let Some(bot_id) = channel.bot_id {
                self.channel.bot_id = Some(bot_id);
            }
            if let Some(excluded_bot_ids) = channel.excluded_bot_ids {
                self.channel.excluded_bot_ids = excluded_bot_ids;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = secret_value(api_key_value);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(secondary_api_key_value) = llm.secondary_api_key {
                self.llm.secondary_api_key = Some(secret_value(secondary_api_key_value));
            }
            if let Some(secondary_base_url) = llm.secondary_base_url {
                self.llm.secondary_base_url = Some(secondary_base_url);
            }
            if let Some(secondary_model) = llm.secondary_model {
                self.llm.secondary_model = Some(secondary_model);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(session) = patch.session {
            if let Some(wake_timeout_secs) = session.wake_timeout_secs {
                self.session.wake_timeout_secs = wake_timeout_secs;
            }
            if let Some(wake_words) = session.wake_words {
                self.session.wake_words = wake_words;
            }
            if let Some(probability) = session.random_join_probability {
                self.session.random_join_probability = probability;
            }
            if let Some(reap_interval_secs) = session.reap_interval_secs {
                self.session.reap_interval_secs = reap_interval_secs;
            }
        }

        if let Some(admission) = patch.admission {
            if let Some(initial_limit) = admission.initial_limit {
                self.admission.initial_limit = initial_limit;
            }
            if let Some(min_limit) = admission.min_limit {
                self.admission.min_limit = min_limit;
            }
            if let Some(max_limit) = admission.max_limit {
                self.admission.max_limit = max_limit;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(deadline_secs) = pipeline.deadline_secs {
                self.pipeline.deadline_secs = deadline_secs;
            }
            if let Some(stage_timeout_secs) = pipeline.stage_timeout_secs {
                self.pipeline.stage_timeout_secs = stage_timeout_secs;
            }
            if let Some(max_history) = pipeline.max_history {
                self.pipeline.max_history = max_history;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
            if let Some(users_file) = storage.users_file {
                self.storage.users_file = users_file;
            }
            if let Some(knowledge_file) = storage.knowledge_file {
                self.storage.knowledge_file = knowledge_file;
            }
        }

        if let Some(database) = patch.database {
            if let Some(enabled) = database.enabled {
                self.database.enabled = enabled;
            }
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MAIMAI_CHANNEL_BOT_TOKEN") {
            self.channel.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("MAIMAI_CHANNEL_BOT_ID") {
            self.channel.bot_id = Some(value);
        }
        if let Some(value) = read_env("MAIMAI_CHANNEL_EXCLUDED_BOT_IDS") {
            self.channel.excluded_bot_ids = parse_list(&value);
        }

        if let Some(value) = read_env("MAIMAI_LLM_API_KEY") {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("MAIMAI_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("MAIMAI_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MAIMAI_LLM_SECONDARY_API_KEY") {
            self.llm.secondary_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MAIMAI_LLM_SECONDARY_BASE_URL") {
            self.llm.secondary_base_url = Some(value);
        }
        if let Some(value) = read_env("MAIMAI_LLM_SECONDARY_MODEL") {
            self.llm.secondary_model = Some(value);
        }
        let request_timeout =
            read_env("MAIMAI_LLM_TIMEOUT_SECS").or_else(|| read_env("MAIMAI_REQUEST_TIMEOUT"));
        if let Some(value) = request_timeout {
            self.llm.timeout_secs = parse_u64("MAIMAI_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("MAIMAI_LLM_MAX_RETRIES", &value)?;
        }

        let wake_timeout = read_env("MAIMAI_SESSION_WAKE_TIMEOUT_SECS")
            .or_else(|| read_env("MAIMAI_WAKE_TIMEOUT"));
        if let Some(value) = wake_timeout {
            self.session.wake_timeout_secs = parse_u64("MAIMAI_SESSION_WAKE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_SESSION_WAKE_WORDS") {
            self.session.wake_words = parse_list(&value);
        }
        if let Some(value) = read_env("MAIMAI_SESSION_RANDOM_JOIN_PROBABILITY") {
            self.session.random_join_probability =
                parse_f64("MAIMAI_SESSION_RANDOM_JOIN_PROBABILITY", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_SESSION_REAP_INTERVAL_SECS") {
            self.session.reap_interval_secs =
                parse_u64("MAIMAI_SESSION_REAP_INTERVAL_SECS", &value)?;
        }

        let initial_limit = read_env("MAIMAI_ADMISSION_INITIAL_LIMIT")
            .or_else(|| read_env("MAIMAI_MAX_CONCURRENCY"));
        if let Some(value) = initial_limit {
            self.admission.initial_limit = parse_usize("MAIMAI_ADMISSION_INITIAL_LIMIT", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_ADMISSION_MIN_LIMIT") {
            self.admission.min_limit = parse_usize("MAIMAI_ADMISSION_MIN_LIMIT", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_ADMISSION_MAX_LIMIT") {
            self.admission.max_limit = parse_usize("MAIMAI_ADMISSION_MAX_LIMIT", &value)?;
        }

        if let Some(value) = read_env("MAIMAI_PIPELINE_DEADLINE_SECS") {
            self.pipeline.deadline_secs = parse_u64("MAIMAI_PIPELINE_DEADLINE_SECS", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_PIPELINE_STAGE_TIMEOUT_SECS") {
            self.pipeline.stage_timeout_secs =
                parse_u64("MAIMAI_PIPELINE_STAGE_TIMEOUT_SECS", &value)?;
        }
        let max_history =
            read_env("MAIMAI_PIPELINE_MAX_HISTORY").or_else(|| read_env("MAIMAI_MAX_HISTORY"));
        if let Some(value) = max_history {
            self.pipeline.max_history = parse_usize("MAIMAI_PIPELINE_MAX_HISTORY", &value)?;
        }

        if let Some(value) = read_env("MAIMAI_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("MAIMAI_DATABASE_ENABLED") {
            self.database.enabled = parse_bool("MAIMAI_DATABASE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MAIMAI_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("MAIMAI_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MAIMAI_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MAIMAI_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MAIMAI_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("MAIMAI_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("MAIMAI_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MAIMAI_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("MAIMAI_LOGGING_LEVEL").or_else(|| read_env("MAIMAI_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MAIMAI_LOGGING_FORMAT").or_else(|| read_env("MAIMAI_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bot_token) = overrides.bot_token {
            self.channel.bot_token = secret_value(bot_token);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(llm_api_key);
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(enabled) = overrides.database_enabled {
            self.database.enabled = enabled;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel(&self.channel)?;
        validate_llm(&self.llm)?;
        validate_session(&self.session)?;
        validate_admission(&self.admission)?;
        validate_pipeline(&self.pipeline)?;
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("maimai.toml"), PathBuf::from("config/maimai.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.bot_token is required (set MAIMAI_CHANNEL_BOT_TOKEN or [channel].bot_token)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set MAIMAI_LLM_API_KEY or [llm].api_key)".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let secondary_fields = [
        llm.secondary_api_key.is_some(),
        llm.secondary_base_url.is_some(),
        llm.secondary_model.is_some(),
    ];
    let configured = secondary_fields.iter().filter(|set| **set).count();
    if configured != 0 && configured != secondary_fields.len() {
        return Err(ConfigError::Validation(
            "llm.secondary_api_key, llm.secondary_base_url and llm.secondary_model must be set together"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.wake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.wake_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if session.wake_words.iter().all(|word| word.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "session.wake_words must contain at least one non-empty word".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&session.random_join_probability) {
        return Err(ConfigError::Validation(
            "session.random_join_probability must be in range 0.0..=1.0".to_string(),
        ));
    }

    if session.reap_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "session.reap_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_admission(admission: &AdmissionConfig) -> Result<(), ConfigError> {
    if admission.min_limit == 0 {
        return Err(ConfigError::Validation(
            "admission.min_limit must be greater than zero".to_string(),
        ));
    }

    if admission.min_limit > admission.max_limit {
        return Err(ConfigError::Validation(
            "admission.min_limit must not exceed admission.max_limit".to_string(),
        ));
    }

    if !(admission.min_limit..=admission.max_limit).contains(&admission.initial_limit) {
        return Err(ConfigError::Validation(
            "admission.initial_limit must be within admission.min_limit..=admission.max_limit"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.deadline_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline.deadline_secs must be greater than zero".to_string(),
        ));
    }

    if pipeline.stage_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline.stage_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if pipeline.max_history == 0 {
        return Err(ConfigError::Validation(
            "pipeline.max_history must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if !database.enabled {
        return Ok(());
    }

    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    channel: Option<ChannelPatch>,
    llm: Option<LlmPatch>,
    session: Option<SessionPatch>,
    admission: Option<AdmissionPatch>,
    pipeline: Option<PipelinePatch>,
    storage: Option<StoragePatch>,
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    bot_token: Option<String>,
    bot_id: Option<String>,
    excluded_bot_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    secondary_api_key: Option<String>,
    secondary_base_url: Option<String>,
    secondary_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    wake_timeout_secs: Option<u64>,
    wake_words: Option<Vec<String>>,
    random_join_probability: Option<f64>,
    reap_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AdmissionPatch {
    initial_limit: Option<usize>,
    min_limit: Option<usize>,
    max_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    deadline_secs: Option<u64>,
    stage_timeout_secs: Option<u64>,
    max_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    data_dir: Option<PathBuf>,
    users_file: Option<String>,
    knowledge_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    enabled: Option<bool>,
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MAIMAI_BOT_TOKEN", "1/token-from-env");
        env::set_var("TEST_MAIMAI_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("maimai.toml");
            fs::write(
                &path,
                r#"
[channel]
bot_token = "${TEST_MAIMAI_BOT_TOKEN}"

[llm]
api_key = "${TEST_MAIMAI_LLM_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.channel.bot_token.expose_secret() == "1/token-from-env",
                "bot token should be loaded from environment",
            )?;
            ensure(
                config.llm.api_key.expose_secret() == "sk-from-env",
                "llm api key should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_MAIMAI_BOT_TOKEN", "TEST_MAIMAI_LLM_KEY"]);
        result
    }

    #[test]
    fn short_aliases_map_onto_runtime_knobs() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAIMAI_CHANNEL_BOT_TOKEN", "1/test");
        env::set_var("MAIMAI_LLM_API_KEY", "sk-test");
        env::set_var("MAIMAI_WAKE_TIMEOUT", "90");
        env::set_var("MAIMAI_MAX_CONCURRENCY", "3");
        env::set_var("MAIMAI_MAX_HISTORY", "8");
        env::set_var("MAIMAI_REQUEST_TIMEOUT", "45");
        env::set_var("MAIMAI_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.session.wake_timeout_secs == 90, "wake timeout alias should apply")?;
            ensure(config.admission.initial_limit == 3, "max concurrency alias should apply")?;
            ensure(config.pipeline.max_history == 8, "max history alias should apply")?;
            ensure(config.llm.timeout_secs == 45, "request timeout alias should apply")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "MAIMAI_CHANNEL_BOT_TOKEN",
            "MAIMAI_LLM_API_KEY",
            "MAIMAI_WAKE_TIMEOUT",
            "MAIMAI_MAX_CONCURRENCY",
            "MAIMAI_MAX_HISTORY",
            "MAIMAI_REQUEST_TIMEOUT",
            "MAIMAI_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn defaults_match_documented_runtime_values() -> Result<(), String> {
        let config = AppConfig::default();

        ensure(config.session.wake_timeout_secs == 180, "wake timeout defaults to 180s")?;
        ensure(config.admission.initial_limit == 5, "initial concurrency defaults to 5")?;
        ensure(config.pipeline.max_history == 20, "history defaults to 20 turns")?;
        ensure(config.llm.timeout_secs == 60, "request timeout defaults to 60s")?;
        ensure(
            (config.session.random_join_probability - 0.1).abs() < f64::EPSILON,
            "random join defaults to 0.1",
        )?;
        ensure(config.pipeline.deadline_secs == 60, "pipeline deadline defaults to 60s")
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAIMAI_LLM_MODEL", "model-from-env");
        env::set_var("MAIMAI_CHANNEL_BOT_TOKEN", "1/from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("maimai.toml");
            fs::write(
                &path,
                r#"
[channel]
bot_token = "1/from-file"

[llm]
api_key = "sk-from-file"
model = "model-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    llm_model: Some("model-from-override".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.model == "model-from-override", "override model should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.channel.bot_token.expose_secret() == "1/from-env",
                "env bot token should win over file and defaults",
            )?;
            ensure(
                config.llm.api_key.expose_secret() == "sk-from-file",
                "file api key should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["MAIMAI_LLM_MODEL", "MAIMAI_CHANNEL_BOT_TOKEN"]);
        result
    }

    #[test]
    fn missing_token_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAIMAI_LLM_API_KEY", "sk-valid");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("channel.bot_token")
            );
            ensure(has_message, "validation failure should mention channel.bot_token")
        })();

        clear_vars(&["MAIMAI_LLM_API_KEY"]);
        result
    }

    #[test]
    fn admission_bounds_are_validated() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.channel.bot_token = "1/token".to_string().into();
        config.llm.api_key = "sk-key".to_string().into();
        config.admission.initial_limit = 30;

        let error = match config.validate() {
            Ok(()) => return Err("initial limit above max should be rejected".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("initial_limit")),
            "validation failure should mention admission.initial_limit",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAIMAI_CHANNEL_BOT_TOKEN", "1/secret-bot-value");
        env::set_var("MAIMAI_LLM_API_KEY", "sk-secret-llm-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("1/secret-bot-value"),
                "debug output should not contain bot token",
            )?;
            ensure(
                !debug.contains("sk-secret-llm-value"),
                "debug output should not contain llm api key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["MAIMAI_CHANNEL_BOT_TOKEN", "MAIMAI_LLM_API_KEY"]);
        result
    }

    #[test]
    fn generation_model_needs_a_complete_secondary_endpoint() {
        let mut config = AppConfig::default();
        let primary = config.llm.model.clone();
        assert_eq!(config.llm.generation_model(), primary);

        config.llm.secondary_model = Some("deepseek-ai/DeepSeek-V3".to_owned());
        assert!(!config.llm.has_secondary());
        assert_eq!(config.llm.generation_model(), primary);

        config.llm.secondary_api_key = Some("sk-second".to_owned().into());
        config.llm.secondary_base_url = Some("https://second.example/v1".to_owned());
        assert!(config.llm.has_secondary());
        assert_eq!(config.llm.generation_model(), "deepseek-ai/DeepSeek-V3");
    }
}
