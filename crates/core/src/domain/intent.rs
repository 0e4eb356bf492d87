use serde::{Deserialize, Serialize};

/// Intent category assigned to a user message by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Normal,
    #[serde(alias = "analytical")]
    Analysis,
    Forecasting,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [Self::Normal, Self::Analysis, Self::Forecasting];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Analysis => "analysis",
            Self::Forecasting => "forecasting",
        }
    }

    /// Parses a classifier label. `analytical` is accepted as a spelling of
    /// `analysis`; anything else yields `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "analysis" | "analytical" => Some(Self::Analysis),
            "forecasting" | "forecast" => Some(Self::Forecasting),
            _ => None,
        }
    }
}

/// Handling path selected by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Normal,
    Analytical,
    Forecasting,
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Analytical => "analytical",
            Self::Forecasting => "forecasting",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::MessageType;

    #[test]
    fn labels_round_trip_through_parser() {
        for message_type in MessageType::ALL {
            assert_eq!(MessageType::from_label(message_type.label()), Some(message_type));
        }
    }

    #[test]
    fn analytical_spelling_is_an_alias() {
        assert_eq!(MessageType::from_label(" Analytical "), Some(MessageType::Analysis));
        let parsed: MessageType = serde_json::from_str("\"analytical\"").expect("alias");
        assert_eq!(parsed, MessageType::Analysis);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert_eq!(MessageType::from_label(""), None);
        assert_eq!(MessageType::from_label("smalltalk"), None);
        assert!(serde_json::from_str::<MessageType>("\"both\"").is_err());
    }
}
