use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const MAX_LLM_RETRIES: u32 = 8;
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub forecast: ForecastConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Analytics database queried by the agent tools.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub url: String,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub classifier_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub step_ceiling: u32,
    pub default_row_limit: u32,
    pub max_row_limit: u32,
    pub include_history: bool,
    pub history_window: usize,
    pub turn_timeout_secs: u64,
    pub reference_date: Option<String>,
    pub max_message_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ForecastConfig {
    pub service_url: Option<String>,
    pub default_horizon: u32,
    pub quantiles: Vec<f64>,
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
pub enum SessionBackend {
    Sqlite,
    Memory,
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
    pub session_backend: Option<SessionBackend>,
    pub session_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub include_history: Option<bool>,
    pub step_ceiling: Option<u32>,
    pub forecast_service_url: Option<String>,
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
                url: "sqlite://salescope.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            session: SessionConfig {
                backend: SessionBackend::Sqlite,
                url: "sqlite://salescope-sessions.db?mode=rwc".to_string(),
                ttl_secs: DEFAULT_SESSION_TTL_SECS,
            },
            llm: LlmConfig {
                api_key: String::new().into(),
                base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
                model: "gemini-2.0-flash".to_string(),
                classifier_model: "gemini-2.0-flash".to_string(),
                temperature: 0.0,
                timeout_secs: 60,
                max_retries: 2,
            },
            agent: AgentConfig {
                step_ceiling: 50,
                default_row_limit: 5,
                max_row_limit: 100,
                include_history: false,
                history_window: 20,
                turn_timeout_secs: 120,
                reference_date: None,
                max_message_chars: 4_000,
            },
            forecast: ForecastConfig {
                service_url: None,
                default_horizon: 2,
                quantiles: vec![0.1, 0.5, 0.9],
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for SessionBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported session backend `{other}` (expected sqlite|memory)"
            ))),
        }
    }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("salescope.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
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

        if let Some(session) = patch.session {
            if let Some(backend) = session.backend {
                self.session.backend = backend;
            }
            if let Some(url) = session.url {
                self.session.url = url;
            }
            if let Some(ttl_secs) = session.ttl_secs {
                self.session.ttl_secs = ttl_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = secret_value(api_key);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(classifier_model) = llm.classifier_model {
                self.llm.classifier_model = classifier_model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(step_ceiling) = agent.step_ceiling {
                self.agent.step_ceiling = step_ceiling;
            }
            if let Some(default_row_limit) = agent.default_row_limit {
                self.agent.default_row_limit = default_row_limit;
            }
            if let Some(max_row_limit) = agent.max_row_limit {
                self.agent.max_row_limit = max_row_limit;
            }
            if let Some(include_history) = agent.include_history {
                self.agent.include_history = include_history;
            }
            if let Some(history_window) = agent.history_window {
                self.agent.history_window = history_window;
            }
            if let Some(turn_timeout_secs) = agent.turn_timeout_secs {
                self.agent.turn_timeout_secs = turn_timeout_secs;
            }
            if let Some(reference_date) = agent.reference_date {
                self.agent.reference_date = Some(reference_date);
            }
            if let Some(max_message_chars) = agent.max_message_chars {
                self.agent.max_message_chars = max_message_chars;
            }
        }

        if let Some(forecast) = patch.forecast {
            if let Some(service_url) = forecast.service_url {
                self.forecast.service_url = Some(service_url);
            }
            if let Some(default_horizon) = forecast.default_horizon {
                self.forecast.default_horizon = default_horizon;
            }
            if let Some(quantiles) = forecast.quantiles {
                self.forecast.quantiles = quantiles;
            }
            if let Some(timeout_secs) = forecast.timeout_secs {
                self.forecast.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
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
        if let Some(value) = read_env("SALESCOPE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SALESCOPE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SALESCOPE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SALESCOPE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SALESCOPE_SESSION_BACKEND") {
            self.session.backend = value.parse()?;
        }
        if let Some(value) = read_env("SALESCOPE_SESSION_URL") {
            self.session.url = value;
        }
        if let Some(value) = read_env("SALESCOPE_SESSION_TTL_SECS") {
            self.session.ttl_secs = parse_u64("SALESCOPE_SESSION_TTL_SECS", &value)?;
        }

        let api_key = read_env("SALESCOPE_LLM_API_KEY").or_else(|| read_env("GEMINI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("SALESCOPE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("SALESCOPE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SALESCOPE_LLM_CLASSIFIER_MODEL") {
            self.llm.classifier_model = value;
        }
        if let Some(value) = read_env("SALESCOPE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SALESCOPE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SALESCOPE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("SALESCOPE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("SALESCOPE_AGENT_STEP_CEILING") {
            self.agent.step_ceiling = parse_u32("SALESCOPE_AGENT_STEP_CEILING", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_DEFAULT_ROW_LIMIT") {
            self.agent.default_row_limit = parse_u32("SALESCOPE_AGENT_DEFAULT_ROW_LIMIT", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_MAX_ROW_LIMIT") {
            self.agent.max_row_limit = parse_u32("SALESCOPE_AGENT_MAX_ROW_LIMIT", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_INCLUDE_HISTORY") {
            self.agent.include_history = parse_bool("SALESCOPE_AGENT_INCLUDE_HISTORY", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_HISTORY_WINDOW") {
            self.agent.history_window = parse_usize("SALESCOPE_AGENT_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_TURN_TIMEOUT_SECS") {
            self.agent.turn_timeout_secs = parse_u64("SALESCOPE_AGENT_TURN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_REFERENCE_DATE") {
            self.agent.reference_date = Some(value);
        }
        if let Some(value) = read_env("SALESCOPE_AGENT_MAX_MESSAGE_CHARS") {
            self.agent.max_message_chars =
                parse_usize("SALESCOPE_AGENT_MAX_MESSAGE_CHARS", &value)?;
        }

        if let Some(value) = read_env("SALESCOPE_FORECAST_SERVICE_URL") {
            self.forecast.service_url = Some(value);
        }
        if let Some(value) = read_env("SALESCOPE_FORECAST_DEFAULT_HORIZON") {
            self.forecast.default_horizon =
                parse_u32("SALESCOPE_FORECAST_DEFAULT_HORIZON", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_FORECAST_QUANTILES") {
            self.forecast.quantiles = parse_f64_list("SALESCOPE_FORECAST_QUANTILES", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_FORECAST_TIMEOUT_SECS") {
            self.forecast.timeout_secs = parse_u64("SALESCOPE_FORECAST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SALESCOPE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SALESCOPE_SERVER_PORT") {
            self.server.port = parse_u16("SALESCOPE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SALESCOPE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SALESCOPE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SALESCOPE_LOGGING_LEVEL").or_else(|| read_env("SALESCOPE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SALESCOPE_LOGGING_FORMAT").or_else(|| read_env("SALESCOPE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(session_backend) = overrides.session_backend {
            self.session.backend = session_backend;
        }
        if let Some(session_url) = overrides.session_url {
            self.session.url = session_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(llm_api_key);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(include_history) = overrides.include_history {
            self.agent.include_history = include_history;
        }
        if let Some(step_ceiling) = overrides.step_ceiling {
            self.agent.step_ceiling = step_ceiling;
        }
        if let Some(service_url) = overrides.forecast_service_url {
            self.forecast.service_url = Some(service_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_session(&self.session)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_forecast(&self.forecast)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("salescope.toml"), PathBuf::from("config/salescope.toml")]
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

fn is_sqlite_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:"
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if !is_sqlite_url(&database.url) {
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

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.backend == SessionBackend::Sqlite && !is_sqlite_url(&session.url) {
        return Err(ConfigError::Validation(
            "session.url must be a sqlite URL when session.backend = \"sqlite\"".to_string(),
        ));
    }

    if session.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_key is required. Set SALESCOPE_LLM_API_KEY (or GEMINI_API_KEY) to a Gemini API key from https://aistudio.google.com/app/apikey".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() || llm.classifier_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.model and llm.classifier_model must not be empty".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_retries > MAX_LLM_RETRIES {
        return Err(ConfigError::Validation(format!(
            "llm.max_retries must be in range 0..={MAX_LLM_RETRIES}"
        )));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.step_ceiling == 0 || agent.step_ceiling > 500 {
        return Err(ConfigError::Validation(
            "agent.step_ceiling must be in range 1..=500".to_string(),
        ));
    }

    if agent.default_row_limit == 0 {
        return Err(ConfigError::Validation(
            "agent.default_row_limit must be greater than zero".to_string(),
        ));
    }

    if agent.max_row_limit < agent.default_row_limit {
        return Err(ConfigError::Validation(
            "agent.max_row_limit must be at least agent.default_row_limit".to_string(),
        ));
    }

    if agent.turn_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.turn_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if agent.max_message_chars == 0 {
        return Err(ConfigError::Validation(
            "agent.max_message_chars must be greater than zero".to_string(),
        ));
    }

    if agent.reference_date.as_ref().is_some_and(|value| value.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "agent.reference_date must not be empty when set (expected e.g. `March 2025`)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_forecast(forecast: &ForecastConfig) -> Result<(), ConfigError> {
    if let Some(service_url) = &forecast.service_url {
        if !service_url.starts_with("http://") && !service_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "forecast.service_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if forecast.default_horizon == 0 || forecast.default_horizon > 24 {
        return Err(ConfigError::Validation(
            "forecast.default_horizon must be in range 1..=24".to_string(),
        ));
    }

    if forecast.quantiles.is_empty() {
        return Err(ConfigError::Validation(
            "forecast.quantiles must list at least one level".to_string(),
        ));
    }
    let in_range = forecast.quantiles.iter().all(|level| *level > 0.0 && *level < 1.0);
    let increasing = forecast.quantiles.windows(2).all(|pair| pair[0] < pair[1]);
    if !in_range || !increasing {
        return Err(ConfigError::Validation(
            "forecast.quantiles must be strictly increasing values in (0, 1)".to_string(),
        ));
    }

    if forecast.timeout_secs == 0 || forecast.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "forecast.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
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

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid(key, value))
}

fn parse_f64_list(key: &str, value: &str) -> Result<Vec<f64>, ConfigError> {
    value
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| invalid(key, value)))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    session: Option<SessionPatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    forecast: Option<ForecastPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    backend: Option<SessionBackend>,
    url: Option<String>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    classifier_model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    step_ceiling: Option<u32>,
    default_row_limit: Option<u32>,
    max_row_limit: Option<u32>,
    include_history: Option<bool>,
    history_window: Option<usize>,
    turn_timeout_secs: Option<u64>,
    reference_date: Option<String>,
    max_message_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastPatch {
    service_url: Option<String>,
    default_horizon: Option<u32>,
    quantiles: Option<Vec<f64>>,
    timeout_secs: Option<u64>,
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
