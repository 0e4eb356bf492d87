//! System prompts for the classifier and the three handling paths.

use std::collections::HashMap;

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

const CLASSIFIER: &str = "classifier";
const NORMAL: &str = "normal";
const ANALYTICAL: &str = "analytical";
const FORECAST_EXTRACT: &str = "forecast_extract";
const FORECAST_ANSWER: &str = "forecast_answer";

const CLASSIFIER_TEMPLATE: &str = r#"Your task is to classify the user's intent into exactly one of three categories.

**Current Reference Date:** {{ reference_date }}
Use this date as the "present" to decide whether a request refers to the past or the future.

**Categories:**
1. "normal": General questions, greetings, or conversation. No database lookup needed.
2. "analysis": Retrieving or analyzing data from the past up to the present ({{ reference_date }}).
   Keywords: "What happened", "Current status", "Last month", "Previous year".
3. "forecasting": Predicting future trends or data points occurring after {{ reference_date }}.
   Keywords: "What will happen", "Prediction", "Next quarter", "Future outlook".

Respond with a JSON object whose `message_type` is one of "normal", "analysis", "forecasting"."#;

const NORMAL_TEMPLATE: &str = r#"You are Salescope, a proactive business-intelligence advisor for a retail business.
Today is {{ reference_date }}.

Answer conversationally and concisely. When it helps, suggest what the user could ask next about
their sales, revenue, inventory, or forecasts. You have no database access in this mode, so never
invent figures; invite the user to ask a data question instead.
{% if history %}
Conversation so far:
{{ history }}
{% endif %}"#;

const ANALYTICAL_TEMPLATE: &str = r#"You are Salescope's data analyst. You answer questions about historical sales data by
querying a read-only SQLite database with the tools provided. Today is {{ reference_date }}.

Rules you must follow:
1. Always call `list_tables` before querying anything, then `describe_schema` for the tables you need.
2. Select only the columns relevant to the question. Never use `SELECT *`.
3. Return at most {{ default_row_limit }} rows unless the user explicitly asks for more.
4. If a query fails, read the error, revise the query, and try again. Do not show raw database errors to the user.
5. The database is read-only. Only SELECT or WITH statements are accepted.
6. Periods are stored as `YYYY-MM` text. Interpret relative dates against {{ reference_date }}.

When you have the answer, reply in plain language and quote the figures you found.
{% if history %}
Conversation so far:
{{ history }}
{% endif %}"#;

const FORECAST_EXTRACT_TEMPLATE: &str = r#"Extract the forecasting request from the user's message. Today is {{ reference_date }}.

Known products:
{% for product in products -%}
- {{ product.product_id }}: {{ product.product_name }} ({{ product.category }})
{% endfor %}
Return a JSON object with:
- `product_id`: the id of the single product the user means, or null for all products combined.
- `metric`: "units" for demand or units sold, "revenue" for sales value.
- `horizon`: the number of future months requested, or null if not stated."#;

const FORECAST_ANSWER_TEMPLATE: &str = r#"Here is the {{ metric_label }} forecast for {{ subject }}, based on {{ history_months }} months of history ending {{ last_period }}:
{% for point in points %}
- {{ point.period }}: about {% if is_revenue %}{{ point.prediction | money }}{% else %}{{ point.prediction | units }} units{% endif %}{% if point.has_range %} (likely between {% if is_revenue %}{{ point.low | money }} and {{ point.high | money }}{% else %}{{ point.low | units }} and {{ point.high | units }}{% endif %}){% endif %}
{%- endfor %}"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),
}

#[derive(Clone, Debug, Serialize)]
pub struct ProductLine {
    pub product_id: String,
    pub product_name: String,
    pub category: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ForecastLine {
    pub period: String,
    pub prediction: f64,
    pub low: f64,
    pub high: f64,
    pub has_range: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ForecastSummary {
    pub metric_label: String,
    pub subject: String,
    pub is_revenue: bool,
    pub history_months: usize,
    pub last_period: String,
    pub points: Vec<ForecastLine>,
}

/// Compiled prompt templates shared by every handler.
#[derive(Debug)]
pub struct Prompts {
    tera: Tera,
}

impl Prompts {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.register_filter("money", money_filter);
        tera.register_filter("units", units_filter);
        tera.add_raw_templates(vec![
            (CLASSIFIER, CLASSIFIER_TEMPLATE),
            (NORMAL, NORMAL_TEMPLATE),
            (ANALYTICAL, ANALYTICAL_TEMPLATE),
            (FORECAST_EXTRACT, FORECAST_EXTRACT_TEMPLATE),
            (FORECAST_ANSWER, FORECAST_ANSWER_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    pub fn classifier(&self, reference_date: &str) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("reference_date", reference_date);
        self.render(CLASSIFIER, &context)
    }

    pub fn normal(&self, reference_date: &str, history: Option<&str>) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("reference_date", reference_date);
        context.insert("history", &history.unwrap_or_default());
        self.render(NORMAL, &context)
    }

    pub fn analytical(
        &self,
        reference_date: &str,
        default_row_limit: u32,
        history: Option<&str>,
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("reference_date", reference_date);
        context.insert("default_row_limit", &default_row_limit);
        context.insert("history", &history.unwrap_or_default());
        self.render(ANALYTICAL, &context)
    }

    pub fn forecast_extract(
        &self,
        reference_date: &str,
        products: &[ProductLine],
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("reference_date", reference_date);
        context.insert("products", products);
        self.render(FORECAST_EXTRACT, &context)
    }

    pub fn forecast_answer(&self, summary: &ForecastSummary) -> Result<String, PromptError> {
        let context = Context::from_serialize(summary)?;
        self.render(FORECAST_ANSWER, &context)
    }

    fn render(&self, name: &str, context: &Context) -> Result<String, PromptError> {
        Ok(self.tera.render(name, context)?.trim().to_string())
    }
}

fn number_arg(value: &tera::Value, filter: &str) -> tera::Result<f64> {
    match value {
        tera::Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| tera::Error::msg(format!("{filter} filter expects a finite number"))),
        tera::Value::Null => Ok(0.0),
        _ => Err(tera::Error::msg(format!("{filter} filter expects a number"))),
    }
}

/// `12400.5` -> `$12,400.50`
fn money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = number_arg(value, "money")?;
    let cents = (amount * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    Ok(tera::Value::String(format!(
        "{sign}${}.{:02}",
        group_thousands(cents / 100),
        cents % 100
    )))
}

/// `1234.6` -> `1,235`
fn units_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let units = number_arg(value, "units")?.round().max(0.0) as i64;
    Ok(tera::Value::String(group_thousands(units)))
}

fn group_thousands(value: i64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
