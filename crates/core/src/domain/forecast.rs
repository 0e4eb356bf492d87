use serde::{Deserialize, Serialize};

/// Series id used when all products are aggregated into one history.
pub const AGGREGATE_SERIES_ID: &str = "All";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMetric {
    #[serde(alias = "units_sold", alias = "demand")]
    Units,
    Revenue,
}

impl ForecastMetric {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Units => "units_sold",
            Self::Revenue => "revenue",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Units => "units sold",
            Self::Revenue => "revenue",
        }
    }
}

/// One historical observation: a monthly period (`YYYY-MM`) and its value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub series_id: String,
    pub period: String,
    pub target: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub series: Vec<SeriesPoint>,
    pub horizon: u32,
    pub quantile_levels: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantileValue {
    pub level: f64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub series_id: String,
    pub period: String,
    pub prediction: f64,
    #[serde(default)]
    pub quantiles: Vec<QuantileValue>,
}

impl ForecastPoint {
    pub fn quantile(&self, level: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|quantile| (quantile.level - level).abs() < 1e-9)
            .map(|quantile| quantile.value)
    }
}
