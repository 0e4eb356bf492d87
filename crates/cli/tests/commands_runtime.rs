use std::env;
use std::sync::{Mutex, OnceLock};

use salescope_cli::commands::{doctor, migrate, seed};
use serde_json::Value;

const VALID_ENV: [(&str, &str); 3] = [
    ("SALESCOPE_LLM_API_KEY", "test-gemini-key"),
    ("SALESCOPE_DATABASE_URL", "sqlite::memory:"),
    ("SALESCOPE_SESSION_BACKEND", "memory"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied pending migrations to 1 database(s)");
    });
}

#[test]
fn migrate_returns_config_failure_without_api_key() {
    with_env(&[("SALESCOPE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
    });
}

#[test]
fn seed_loads_demo_dataset() {
    with_env(&VALID_ENV, || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "demo sales dataset loaded: 4 products, 24 monthly rows");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("sales.db").display());

    with_env(
        &[
            ("SALESCOPE_LLM_API_KEY", "test-gemini-key"),
            ("SALESCOPE_DATABASE_URL", url.as_str()),
            ("SALESCOPE_SESSION_BACKEND", "memory"),
        ],
        || {
            let first = parse_payload(&seed::run().output);
            let second = parse_payload(&seed::run().output);

            assert_eq!(first["status"], "ok");
            assert_eq!(second["status"], "ok");
            assert_eq!(first["message"], second["message"]);
        },
    );
}

#[test]
fn doctor_reports_seeded_database_as_ready() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("sales.db").display());

    with_env(
        &[
            ("SALESCOPE_LLM_API_KEY", "test-gemini-key"),
            ("SALESCOPE_DATABASE_URL", url.as_str()),
            ("SALESCOPE_SESSION_BACKEND", "memory"),
        ],
        || {
            assert_eq!(seed::run().exit_code, 0);

            let result = doctor::run(true);
            let report = parse_payload(&result.output);
            assert_eq!(result.exit_code, 0, "doctor should pass: {}", result.output);
            assert_eq!(report["overall_status"], "pass");

            let checks = report["checks"].as_array().cloned().unwrap_or_default();
            let status_of = |name: &str| {
                checks
                    .iter()
                    .find(|check| check["name"] == name)
                    .map(|check| check["status"].clone())
                    .unwrap_or(Value::Null)
            };
            assert_eq!(status_of("analytics_database"), "pass");
            assert_eq!(status_of("session_store"), "pass");
            assert_eq!(status_of("forecast_service"), "skipped");
        },
    );
}

#[test]
fn doctor_fails_and_skips_dependents_when_config_invalid() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().cloned().unwrap_or_default();
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SALESCOPE_DATABASE_URL",
        "SALESCOPE_DATABASE_MAX_CONNECTIONS",
        "SALESCOPE_DATABASE_TIMEOUT_SECS",
        "SALESCOPE_SESSION_BACKEND",
        "SALESCOPE_SESSION_URL",
        "SALESCOPE_SESSION_TTL_SECS",
        "SALESCOPE_LLM_API_KEY",
        "GEMINI_API_KEY",
        "SALESCOPE_LLM_BASE_URL",
        "SALESCOPE_LLM_MODEL",
        "SALESCOPE_LLM_TIMEOUT_SECS",
        "SALESCOPE_LLM_MAX_RETRIES",
        "SALESCOPE_FORECAST_SERVICE_URL",
        "SALESCOPE_SERVER_BIND_ADDRESS",
        "SALESCOPE_SERVER_PORT",
        "SALESCOPE_LOGGING_LEVEL",
        "SALESCOPE_LOGGING_FORMAT",
        "SALESCOPE_LOG_LEVEL",
        "SALESCOPE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
