//! Name-based event filtering.

use std::collections::BTreeSet;

use fa_core::AnalyticsEvent;

/// Decides which events are hidden from display.
///
/// Filtered events are marked, not dropped, so they can still be saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    only: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl EventFilter {
    /// Builds a filter from `--only` names and the exclusion list.
    ///
    /// A name given to `--only` is never excluded, so an explicit request
    /// overrides configured exclusions.
    pub fn new(
        only: impl IntoIterator<Item = String>,
        exclude: impl IntoIterator<Item = String>,
    ) -> Self {
        let only: BTreeSet<String> = only.into_iter().collect();
        let exclude = exclude
            .into_iter()
            .filter(|name| !only.contains(name))
            .collect();
        Self { only, exclude }
    }

    /// Whether an event with this name is hidden.
    pub fn is_filtered(&self, name: &str) -> bool {
        self.exclude.contains(name) || (!self.only.is_empty() && !self.only.contains(name))
    }

    /// Marks the event filtered when its name is hidden.
    pub fn apply(&self, event: AnalyticsEvent) -> AnalyticsEvent {
        if self.is_filtered(event.name.as_str()) {
            event.with_filtered(true)
        } else {
            event
        }
    }
}
