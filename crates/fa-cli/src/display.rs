//! Terminal rendering of events.

use std::io::{self, Write};

use crossterm::style::Stylize;
use fa_core::AnalyticsEvent;

const INDENT: &str = "    ";
const MANUAL_MARKER: &str = "  * ";

/// How events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable blocks, optionally colored.
    Text { color: bool },
    /// One JSON object per line.
    Json,
}

impl OutputMode {
    pub fn new(json: bool, color: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text { color }
        }
    }

    pub fn write_event<W: Write>(self, writer: &mut W, event: &AnalyticsEvent) -> io::Result<()> {
        match self {
            Self::Json => {
                serde_json::to_writer(&mut *writer, event)?;
                writeln!(writer)
            }
            Self::Text { color } => write_text(writer, event, color),
        }
    }
}

/// Writes the header line, then parameters sorted by key, then items.
///
/// Manual parameters are marked with `*`.
fn write_text<W: Write>(writer: &mut W, event: &AnalyticsEvent, color: bool) -> io::Result<()> {
    let timestamp = event.display_timestamp();
    let name = event.name.as_str();
    let suffix = if event.is_filtered { " [filtered]" } else { "" };
    if color {
        let styled_name = if event.is_diagnostic() {
            name.bold().yellow()
        } else {
            name.bold().green()
        };
        writeln!(writer, "{}  {styled_name}{suffix}", timestamp.as_str().dark_grey())?;
    } else {
        writeln!(writer, "{timestamp}  {name}{suffix}")?;
    }

    for (key, value) in event.all_parameters() {
        let marker = if event.manual_parameters.contains_key(&key) {
            MANUAL_MARKER
        } else {
            INDENT
        };
        if color {
            writeln!(writer, "{marker}{} = {value}", key.as_str().cyan())?;
        } else {
            writeln!(writer, "{marker}{key} = {value}")?;
        }
    }

    for (idx, item) in event.items.iter().enumerate() {
        writeln!(writer, "{INDENT}items[{idx}]")?;
        for (key, value) in item {
            writeln!(writer, "{INDENT}{INDENT}{key} = {value}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fa_core::Params;
    use insta::assert_snapshot;

    const PURCHASE: &str = "01-05 10:00:00.123  1234  5678 V FA      : Logging event (FE): purchase, Bundle[{currency=USD, value=Double(24.5), items=[Bundle[{item_id=sku123, item_name=String(T-Shirt)}], Bundle[{item_id=sku456}]]}]";

    fn render(mode: OutputMode, event: &AnalyticsEvent) -> String {
        let mut out = Vec::new();
        mode.write_event(&mut out, event).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text_output_lists_parameters_and_items() {
        let event = fa_core::parse(PURCHASE).unwrap();
        assert_snapshot!(render(OutputMode::Text { color: false }, &event), @r"
        01-05 10:00:00.123  purchase
            currency = USD
            item_id = sku456
            item_name = T-Shirt
            value = 24.5
            items[0]
                item_id = sku123
                item_name = T-Shirt
            items[1]
                item_id = sku456
        ");
    }

    #[test]
    fn test_manual_parameters_are_marked() {
        let event = fa_core::parse(PURCHASE)
            .unwrap()
            .with_manual_parameters(Params::from([
                ("tester".to_string(), "qa-1".to_string()),
                ("value".to_string(), "30".to_string()),
            ]))
            .with_filtered(true);
        let output = render(OutputMode::Text { color: false }, &event);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "01-05 10:00:00.123  purchase [filtered]");
        assert_eq!(lines[1], "    currency = USD");
        assert_eq!(lines[4], "  * tester = qa-1");
        assert_eq!(lines[5], "  * value = 30");
    }

    #[test]
    fn test_colored_output_contains_plain_text() {
        let event = fa_core::parse(PURCHASE).unwrap();
        let output = render(OutputMode::Text { color: true }, &event);
        assert!(output.contains("purchase"));
        assert!(output.contains("= USD"));
    }

    #[test]
    fn test_json_output_is_one_line() {
        let event = fa_core::parse(PURCHASE).unwrap();
        let output = render(OutputMode::new(true, true), &event);
        assert_eq!(output.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["name"], "purchase");
        assert_eq!(value["rawTimestamp"], "01-05 10:00:00.123");
        assert_eq!(value["items"][1]["item_id"], "sku456");
    }
}
