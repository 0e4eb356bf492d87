use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use salescope_core::domain::forecast::{
    ForecastMetric, ForecastPoint, ForecastRequest, AGGREGATE_SERIES_ID,
};
use salescope_core::domain::intent::Route;
use salescope_core::domain::message::Message;
use salescope_db::{ProductSummary, SalesRepository};

use crate::forecast_client::ForecastProvider;
use crate::handlers::{HandlerContext, HandlerOutcome, PathHandler};
use crate::llm::{strip_code_fence, GenerationRequest, LlmClient, ModelTier};
use crate::prompts::{ForecastLine, ForecastSummary, ProductLine, Prompts};

pub const MAX_FORECAST_HORIZON: u32 = 24;

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct ForecastQuery {
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default = "default_metric")]
    metric: ForecastMetric,
    #[serde(default)]
    horizon: Option<u32>,
}

fn default_metric() -> ForecastMetric {
    ForecastMetric::Units
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "product_id": { "type": "string", "nullable": true },
            "metric": { "type": "string", "enum": ["units", "revenue"] },
            "horizon": { "type": "integer", "nullable": true }
        },
        "required": ["metric"]
    })
}

/// Extracts product/metric/horizon with one structured call, builds the
/// monthly history and phrases the provider's predictions.
pub struct ForecastingHandler {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    sales: Arc<dyn SalesRepository>,
    provider: Option<Arc<dyn ForecastProvider>>,
    default_horizon: u32,
    quantile_levels: Vec<f64>,
}

impl ForecastingHandler {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<Prompts>,
        sales: Arc<dyn SalesRepository>,
        provider: Option<Arc<dyn ForecastProvider>>,
        default_horizon: u32,
        quantile_levels: Vec<f64>,
    ) -> Self {
        Self { llm, prompts, sales, provider, default_horizon, quantile_levels }
    }

    async fn extract(
        &self,
        context: &HandlerContext<'_>,
        catalogue: &[ProductSummary],
    ) -> Result<Option<ForecastQuery>, String> {
        let products = catalogue
            .iter()
            .map(|product| ProductLine {
                product_id: product.product_id.clone(),
                product_name: product.product_name.clone(),
                category: product.category.clone(),
            })
            .collect::<Vec<_>>();
        let system_prompt = self
            .prompts
            .forecast_extract(context.reference_date, &products)
            .map_err(|error| error.to_string())?;

        let request = GenerationRequest::new(vec![Message::user(context.latest_user_text())])
            .with_system_prompt(system_prompt)
            .with_response_schema(extraction_schema())
            .on_tier(ModelTier::Classifier);

        let response = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return Ok(None),
            response = self.llm.generate(request) => response,
        };
        let text = response.map_err(|error| error.to_string())?.content.primary_text();
        serde_json::from_str(strip_code_fence(&text))
            .map(Some)
            .map_err(|error| format!("could not read the forecast request: {error}"))
    }
}

fn resolve_product<'a>(catalogue: &'a [ProductSummary], wanted: &str) -> Option<&'a ProductSummary> {
    let wanted = wanted.trim();
    catalogue.iter().find(|product| {
        product.product_id.eq_ignore_ascii_case(wanted)
            || product.product_name.eq_ignore_ascii_case(wanted)
    })
}

fn forecast_lines(points: &[ForecastPoint], series_id: &str, levels: &[f64]) -> Vec<ForecastLine> {
    let low_level = levels.first().copied();
    let high_level = levels.last().copied();

    points
        .iter()
        .filter(|point| point.series_id == series_id)
        .map(|point| {
            let low = low_level.and_then(|level| point.quantile(level));
            let high = high_level.and_then(|level| point.quantile(level));
            let has_range = levels.len() >= 2 && low.is_some() && high.is_some();
            ForecastLine {
                period: point.period.clone(),
                prediction: point.prediction,
                low: low.unwrap_or(point.prediction),
                high: high.unwrap_or(point.prediction),
                has_range,
            }
        })
        .collect()
}

#[async_trait]
impl PathHandler for ForecastingHandler {
    fn route(&self) -> Route {
        Route::Forecasting
    }

    async fn handle(&self, context: HandlerContext<'_>) -> HandlerOutcome {
        let Some(provider) = self.provider.as_ref() else {
            warn!(
                event_name = "agent.forecast.unconfigured",
                correlation_id = context.correlation_id,
                "forecast service url is not configured"
            );
            return HandlerOutcome::answered(
                "Forecasting isn't available right now because no forecasting service is \
                 configured. I can still answer questions about past sales.",
            );
        };

        let catalogue = match self.sales.product_catalogue().await {
            Ok(catalogue) => catalogue,
            Err(error) => return HandlerOutcome::Failed { reason: error.to_string() },
        };

        let query = match self.extract(&context, &catalogue).await {
            Ok(Some(query)) => query,
            Ok(None) => return HandlerOutcome::Cancelled,
            Err(reason) => return HandlerOutcome::Failed { reason },
        };

        let product = match query.product_id.as_deref().filter(|id| !id.trim().is_empty()) {
            None => None,
            Some(wanted) => match resolve_product(&catalogue, wanted) {
                Some(product) => Some(product),
                None => {
                    let known = catalogue
                        .iter()
                        .map(|product| format!("{} ({})", product.product_name, product.product_id))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return HandlerOutcome::answered(format!(
                        "I couldn't find a product matching \"{wanted}\". Known products: {known}."
                    ));
                }
            },
        };

        let horizon = query.horizon.unwrap_or(self.default_horizon).clamp(1, MAX_FORECAST_HORIZON);
        let series_id = product.map_or(AGGREGATE_SERIES_ID, |product| product.product_id.as_str());
        let subject = product.map_or_else(|| "all products".to_string(), |p| p.product_name.clone());

        let series = match self
            .sales
            .monthly_series(product.map(|product| product.product_id.as_str()), query.metric)
            .await
        {
            Ok(series) => series,
            Err(error) => return HandlerOutcome::Failed { reason: error.to_string() },
        };
        let Some(last_period) = series.last().map(|point| point.period.clone()) else {
            return HandlerOutcome::answered(format!(
                "There is no sales history for {subject} yet, so I can't forecast it."
            ));
        };

        let request = ForecastRequest {
            series,
            horizon,
            quantile_levels: self.quantile_levels.clone(),
        };
        let points = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return HandlerOutcome::Cancelled,
            points = provider.forecast(query.metric, &request) => points,
        };
        let points = match points {
            Ok(points) => points,
            Err(error) => return HandlerOutcome::Failed { reason: error.to_string() },
        };

        let lines = forecast_lines(&points, series_id, &self.quantile_levels);
        if lines.is_empty() {
            return HandlerOutcome::Failed {
                reason: "the forecasting service returned no predictions".to_string(),
            };
        }

        info!(
            event_name = "agent.forecast.completed",
            correlation_id = context.correlation_id,
            series_id,
            metric = query.metric.column(),
            horizon,
            "forecast produced"
        );

        let summary = ForecastSummary {
            metric_label: query.metric.label().to_string(),
            subject,
            is_revenue: query.metric == ForecastMetric::Revenue,
            history_months: request.series.len(),
            last_period,
            points: lines,
        };
        match self.prompts.forecast_answer(&summary) {
            Ok(text) => HandlerOutcome::answered(text),
            Err(error) => HandlerOutcome::Failed { reason: error.to_string() },
        }
    }
}
