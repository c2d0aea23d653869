//! Canonical analytics events produced from log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, EventName, Params};

/// Event name given to the "invalid default event parameter type" warning.
pub const INVALID_DEFAULT_PARAM_EVENT: &str = "fa_invalid_default_param";

/// Display format used when no raw timestamp text is available.
const DISPLAY_TIMESTAMP_FORMAT: &str = "%m-%d %H:%M:%S%.3f";

/// A normalized analytics event, whatever log format it was parsed from.
///
/// Events are immutable once produced. Consumers that need to inject
/// parameters or mark an event as filtered derive a copy with
/// [`with_manual_parameters`](Self::with_manual_parameters) or
/// [`with_filtered`](Self::with_filtered); identity fields are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    /// Unique identifier for this event instance.
    pub id: EventId,
    /// Resolved absolute time of the event.
    pub timestamp: DateTime<Utc>,
    /// The year-less timestamp exactly as it appeared in the log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_timestamp: Option<String>,
    /// The event type, e.g. `purchase`.
    pub name: EventName,
    /// Decoded parameters, all values as plain text.
    #[serde(default)]
    pub parameters: Params,
    /// Nested repeated records (e.g. commerce line items).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Params>,
    /// Parameters injected after parsing; kept apart from `parameters` so
    /// parsed and injected values stay distinguishable.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub manual_parameters: Params,
    /// Set by consumers that hide the event from display.
    #[serde(default)]
    pub is_filtered: bool,
}

impl AnalyticsEvent {
    /// Parsed parameters overlaid with manual parameters (manual wins).
    pub fn all_parameters(&self) -> Params {
        let mut all = self.parameters.clone();
        all.extend(
            self.manual_parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        all
    }

    /// Timestamp text for display, preferring the raw text from the log line.
    pub fn display_timestamp(&self) -> String {
        self.raw_timestamp.clone().unwrap_or_else(|| {
            self.timestamp
                .with_timezone(&chrono::Local)
                .format(DISPLAY_TIMESTAMP_FORMAT)
                .to_string()
        })
    }

    /// Returns a copy with `manual_parameters` replaced.
    #[must_use]
    pub fn with_manual_parameters(&self, manual_parameters: Params) -> Self {
        Self {
            manual_parameters,
            ..self.clone()
        }
    }

    /// Returns a copy with `is_filtered` replaced.
    #[must_use]
    pub fn with_filtered(&self, is_filtered: bool) -> Self {
        Self {
            is_filtered,
            ..self.clone()
        }
    }

    /// Whether this event is the pseudo-event for an invalid default parameter warning.
    pub fn is_diagnostic(&self) -> bool {
        self.name == INVALID_DEFAULT_PARAM_EVENT
    }
}
