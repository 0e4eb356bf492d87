use crate::domain::intent::{MessageType, Route};

/// Maps a classification to the path that handles it. Anything that is not
/// explicitly normal or forecasting, including a missing label, goes to the
/// analytical path.
pub fn route(message_type: Option<MessageType>) -> Route {
    match message_type {
        Some(MessageType::Normal) => Route::Normal,
        Some(MessageType::Forecasting) => Route::Forecasting,
        Some(MessageType::Analysis) | None => Route::Analytical,
    }
}

/// Routes a raw classifier label.
pub fn route_label(label: &str) -> Route {
    route(MessageType::from_label(label))
}
