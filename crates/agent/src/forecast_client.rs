use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use salescope_core::domain::forecast::{ForecastMetric, ForecastPoint, ForecastRequest, QuantileValue};

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast service returned HTTP {status}: {message}")]
    Service { status: u16, message: String },
    #[error("forecast service unreachable: {0}")]
    Unavailable(String),
    #[error("could not parse forecast response: {0}")]
    Parse(String),
    #[error("forecast client misconfigured: {0}")]
    Configuration(String),
}

/// Black-box numeric predictor: history in, point and quantile predictions out.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(
        &self,
        metric: ForecastMetric,
        request: &ForecastRequest,
    ) -> Result<Vec<ForecastPoint>, ForecastError>;
}

/// JSON client for the forecasting service's `POST /predict` endpoint.
#[derive(Clone, Debug)]
pub struct HttpForecastProvider {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpForecastProvider {
    pub fn new(service_url: &str, timeout_secs: u64) -> Result<Self, ForecastError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|error| ForecastError::Configuration(error.to_string()))?;
        Ok(Self { http, endpoint: format!("{}/predict", service_url.trim_end_matches('/')) })
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    async fn forecast(
        &self,
        metric: ForecastMetric,
        request: &ForecastRequest,
    ) -> Result<Vec<ForecastPoint>, ForecastError> {
        debug!(
            event_name = "agent.forecast.request",
            metric = metric.column(),
            points = request.series.len(),
            horizon = request.horizon,
            "requesting forecast"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request_body(metric, request))
            .send()
            .await
            .map_err(|error| ForecastError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ForecastError::Service { status: status.as_u16(), message });
        }

        let body: Value =
            response.json().await.map_err(|error| ForecastError::Parse(error.to_string()))?;
        parse_records(&body, &request.quantile_levels)
    }
}

pub(crate) fn request_body(metric: ForecastMetric, request: &ForecastRequest) -> Value {
    let rows = request
        .series
        .iter()
        .map(|point| {
            let mut row = json!({ "product_id": point.series_id, "period": point.period });
            row[metric.column()] = json!(point.target);
            row
        })
        .collect::<Vec<_>>();

    json!({
        "df": rows,
        "prediction_length": request.horizon,
        "quantile_levels": request.quantile_levels,
        "id_column": "product_id",
        "timestamp_column": "period",
        "target": metric.column(),
    })
}

/// Accepts the service's record list, either bare or under `prediction`.
pub(crate) fn parse_records(
    body: &Value,
    quantile_levels: &[f64],
) -> Result<Vec<ForecastPoint>, ForecastError> {
    let records = body
        .as_array()
        .or_else(|| body.get("prediction").and_then(Value::as_array))
        .ok_or_else(|| ForecastError::Parse("expected a list of prediction records".to_string()))?;

    records
        .iter()
        .map(|record| {
            let series_id = record
                .get("product_id")
                .or_else(|| record.get("item_id"))
                .and_then(Value::as_str)
                .ok_or_else(|| ForecastError::Parse("record without product_id".to_string()))?;
            let period = record
                .get("period")
                .or_else(|| record.get("timestamp"))
                .and_then(Value::as_str)
                .ok_or_else(|| ForecastError::Parse("record without period".to_string()))?;
            let prediction = record
                .get("predictions")
                .or_else(|| record.get("prediction"))
                .and_then(Value::as_f64)
                .ok_or_else(|| ForecastError::Parse("record without predictions".to_string()))?;

            let quantiles = quantile_levels
                .iter()
                .filter_map(|level| {
                    record
                        .get(format!("{level}").as_str())
                        .and_then(Value::as_f64)
                        .map(|value| QuantileValue { level: *level, value })
                })
                .collect();

            Ok(ForecastPoint {
                series_id: series_id.to_string(),
                period: normalize_period(period),
                prediction,
                quantiles,
            })
        })
        .collect()
}

/// `2025-04-01T00:00:00` -> `2025-04`
fn normalize_period(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let looks_monthly = bytes.len() >= 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit);
    if looks_monthly {
        raw[..7].to_string()
    } else {
        raw.to_string()
    }
}
