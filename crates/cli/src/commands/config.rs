use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use salescope_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let optional = |value: Option<&str>| value.unwrap_or("<unset>").to_string();

    vec![
        Field::new("database.url", &config.database.url, &["SALESCOPE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SALESCOPE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "session.backend",
            format!("{:?}", config.session.backend).to_lowercase(),
            &["SALESCOPE_SESSION_BACKEND"],
        ),
        Field::new("session.url", &config.session.url, &["SALESCOPE_SESSION_URL"]),
        Field::new(
            "session.ttl_secs",
            config.session.ttl_secs.to_string(),
            &["SALESCOPE_SESSION_TTL_SECS"],
        ),
        Field::new(
            "llm.api_key",
            redact_secret(config.llm.api_key.expose_secret()),
            &["SALESCOPE_LLM_API_KEY", "GEMINI_API_KEY"],
        ),
        Field::new("llm.base_url", &config.llm.base_url, &["SALESCOPE_LLM_BASE_URL"]),
        Field::new("llm.model", &config.llm.model, &["SALESCOPE_LLM_MODEL"]),
        Field::new(
            "llm.classifier_model",
            &config.llm.classifier_model,
            &["SALESCOPE_LLM_CLASSIFIER_MODEL"],
        ),
        Field::new(
            "agent.step_ceiling",
            config.agent.step_ceiling.to_string(),
            &["SALESCOPE_AGENT_STEP_CEILING"],
        ),
        Field::new(
            "agent.default_row_limit",
            config.agent.default_row_limit.to_string(),
            &["SALESCOPE_AGENT_DEFAULT_ROW_LIMIT"],
        ),
        Field::new(
            "agent.max_row_limit",
            config.agent.max_row_limit.to_string(),
            &["SALESCOPE_AGENT_MAX_ROW_LIMIT"],
        ),
        Field::new(
            "agent.include_history",
            config.agent.include_history.to_string(),
            &["SALESCOPE_AGENT_INCLUDE_HISTORY"],
        ),
        Field::new(
            "agent.turn_timeout_secs",
            config.agent.turn_timeout_secs.to_string(),
            &["SALESCOPE_AGENT_TURN_TIMEOUT_SECS"],
        ),
        Field::new(
            "agent.reference_date",
            optional(config.agent.reference_date.as_deref()),
            &["SALESCOPE_AGENT_REFERENCE_DATE"],
        ),
        Field::new(
            "forecast.service_url",
            optional(config.forecast.service_url.as_deref()),
            &["SALESCOPE_FORECAST_SERVICE_URL"],
        ),
        Field::new(
            "forecast.default_horizon",
            config.forecast.default_horizon.to_string(),
            &["SALESCOPE_FORECAST_DEFAULT_HORIZON"],
        ),
        Field::new(
            "forecast.quantiles",
            config
                .forecast
                .quantiles
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            &["SALESCOPE_FORECAST_QUANTILES"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["SALESCOPE_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["SALESCOPE_SERVER_PORT"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["SALESCOPE_LOGGING_LEVEL", "SALESCOPE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["SALESCOPE_LOGGING_FORMAT", "SALESCOPE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["salescope.toml", "config/salescope.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
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

/// Keeps only a short prefix of long secrets so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<unset>".to_string();
    }

    let chars = trimmed.chars().count();
    if chars < 12 {
        return "<redacted>".to_string();
    }

    let prefix = trimmed.chars().take(4).collect::<String>();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        assert_eq!(redact_secret(""), "<unset>");
        assert_eq!(redact_secret("short"), "<redacted>");
        assert_eq!(redact_secret("AIzaSyExampleKeyValue"), "AIza***");
    }

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc: toml::Value = "[agent]\nstep_ceiling = 10\n".parse().expect("toml");

        assert!(contains_path(&doc, "agent.step_ceiling"));
        assert!(!contains_path(&doc, "agent.include_history"));
        assert!(!contains_path(&doc, "forecast.service_url"));
    }

    #[test]
    fn file_source_is_reported_when_no_env_override() {
        let doc: toml::Value = "[forecast]\ndefault_horizon = 6\n".parse().expect("toml");
        let source = field_source(
            "forecast.default_horizon",
            &["SALESCOPE_TEST_UNSET_HORIZON"],
            Some(&doc),
            Some(std::path::Path::new("salescope.toml")),
        );

        assert_eq!(source, "file (salescope.toml)");
        assert_eq!(
            field_source("forecast.quantiles", &[], Some(&doc), None),
            "default"
        );
    }
}
