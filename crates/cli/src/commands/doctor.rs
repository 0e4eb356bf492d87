use salescope_agent::assembly::open_session_store;
use salescope_core::config::{AppConfig, LoadOptions};
use salescope_core::domain::session::SessionId;
use salescope_db::{connect_read_only, SqlSalesRepository};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["llm_credentials", "analytics_database", "session_store", "forecast_service"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_llm_credentials(&config));
            checks.extend(check_storage(&config));
            checks.push(check_forecast_service(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.iter().map(|name| {
                DoctorCheck::skipped(name, "skipped because configuration did not load")
            }));
        }
    }

    summarize(checks)
}

/// Skipped checks are informational; only failures fail the report.
fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    if config.llm.api_key.expose_secret().trim().is_empty() {
        return DoctorCheck::fail("llm_credentials", "llm.api_key is empty");
    }
    DoctorCheck::pass(
        "llm_credentials",
        format!(
            "api key present; model `{}`, classifier model `{}`",
            config.llm.model, config.llm.classifier_model
        ),
    )
}

fn check_forecast_service(config: &AppConfig) -> DoctorCheck {
    match config.forecast.service_url.as_deref() {
        Some(url) => DoctorCheck::pass("forecast_service", format!("configured at `{url}`")),
        None => DoctorCheck::skipped(
            "forecast_service",
            "forecast.service_url is unset; forecasting questions will report unavailability",
        ),
    }
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("analytics_database", details.clone()),
                DoctorCheck::fail("session_store", details),
            ];
        }
    };

    runtime.block_on(async {
        vec![check_analytics_database(config).await, check_session_store(config).await]
    })
}

async fn check_analytics_database(config: &AppConfig) -> DoctorCheck {
    let pool = match connect_read_only(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
        Ok(pool) => pool,
        Err(error) => {
            return DoctorCheck::fail(
                "analytics_database",
                format!("failed to connect to `{}`: {error}", config.database.url),
            );
        }
    };

    let rows = SqlSalesRepository::new(pool.clone()).row_count().await;
    pool.close().await;

    match rows {
        Ok(0) => DoctorCheck::fail(
            "analytics_database",
            "products table is empty; run `salescope seed` to load demo data",
        ),
        Ok(rows) => DoctorCheck::pass(
            "analytics_database",
            format!("connected read-only to `{}` ({rows} sales rows)", config.database.url),
        ),
        Err(error) => DoctorCheck::fail(
            "analytics_database",
            format!("products table unavailable ({error}); run `salescope migrate`"),
        ),
    }
}

async fn check_session_store(config: &AppConfig) -> DoctorCheck {
    let store = match open_session_store(config).await {
        Ok(store) => store,
        Err(error) => return DoctorCheck::fail("session_store", error.to_string()),
    };
    let probe = match SessionId::parse("doctor-probe") {
        Ok(probe) => probe,
        Err(error) => return DoctorCheck::fail("session_store", error.to_string()),
    };

    match store.exists(&probe).await {
        Ok(_) => DoctorCheck::pass(
            "session_store",
            format!(
                "{:?} backend reachable (ttl {}s)",
                config.session.backend, config.session.ttl_secs
            )
            .to_lowercase(),
        ),
        Err(error) => DoctorCheck::fail("session_store", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
