//! Recognition of Firebase Analytics log lines.
//!
//! The SDK has printed events in several layouts over the years, and the
//! frontend (`FA`) and measurement service (`FA-SVC`) tags differ again. Each
//! layout is a [`LineMatcher`]; the [`LineParser`] tries them in a fixed order
//! and the first one that recognizes the line wins.
//!
//! Ordering matters: a matcher must come before every more general matcher
//! that could also accept its lines.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Local, TimeZone};
use regex::{Captures, Regex};

use crate::bundle;
use crate::event::{AnalyticsEvent, INVALID_DEFAULT_PARAM_EVENT};
use crate::normalize::{Extraction, normalize};
use crate::types::{EventName, Params};

/// Partial logcat timestamp at the start of a line (group 1).
const TIMESTAMP: &str = r"(\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3})";

/// Event name (group 2) with an optional alias suffix that is not captured.
const NAME: &str = r"([A-Za-z0-9_]+)(?:\([A-Za-z0-9_]*\))?";

static STANDARD_PARSER: LazyLock<LineParser> = LazyLock::new(LineParser::default);

/// Layouts carrying a `Bundle[...]` parameter blob, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleFormat {
    /// `FA-SVC: Logging event: origin=..,name=NAME,params=Bundle[...]`
    ServiceOrigin,
    /// `Logging event (FE): NAME(_alias), Bundle[...]`
    FrontendAliased,
    /// `Logging event (FE): NAME, Bundle[...]`
    Frontend,
    /// `Logging event: origin=..,name=NAME,params=Bundle[...]` under any tag
    Origin,
    /// `Event recorded: Event{.. name='NAME' .. params=Bundle[...]}`
    EventRecorded,
    /// `Event logged: NAME, params=Bundle[...]`
    EventLogged,
    /// `Event: NAME, Bundle[...]`
    EventColon,
}

impl BundleFormat {
    pub const ALL: [Self; 7] = [
        Self::ServiceOrigin,
        Self::FrontendAliased,
        Self::Frontend,
        Self::Origin,
        Self::EventRecorded,
        Self::EventLogged,
        Self::EventColon,
    ];

    /// Pattern following the timestamp. Group 2 is the name, group 3 the blob.
    fn pattern(self) -> String {
        let body = match self {
            Self::ServiceOrigin => format!(
                r"\bFA-SVC\b.*?Logging event:\s*origin=[^,]*,\s*name={NAME},\s*params=(.*)"
            ),
            Self::FrontendAliased => {
                r"Logging event \(FE\):\s*([A-Za-z0-9_]+)\([A-Za-z0-9_]*\),\s*(.*)".to_string()
            }
            Self::Frontend => r"Logging event \(FE\):\s*([A-Za-z0-9_]+),\s*(.*)".to_string(),
            Self::Origin => {
                format!(r"Logging event:\s*origin=[^,]*,\s*name={NAME},\s*params=(.*)")
            }
            Self::EventRecorded => {
                format!(r"Event recorded:\s*Event\{{.*?\bname='{NAME}'.*?\bparams=(.*)")
            }
            Self::EventLogged => format!(r"Event logged:\s*{NAME},\s*params=(.*)"),
            Self::EventColon => format!(r"\bEvent:\s*{NAME},\s*(.*)"),
        };
        format!(r"^{TIMESTAMP}\s.*?{body}$")
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServiceOrigin => "service_origin",
            Self::FrontendAliased => "frontend_aliased",
            Self::Frontend => "frontend",
            Self::Origin => "origin",
            Self::EventRecorded => "event_recorded",
            Self::EventLogged => "event_logged",
            Self::EventColon => "event_colon",
        };
        write!(f, "{s}")
    }
}

/// Layouts that log an event name with no parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameOnlyFormat {
    /// `FA: Logging event (FE): NAME`
    Frontend,
    /// `FA-SVC: Logging event: NAME`
    Service,
}

impl NameOnlyFormat {
    fn pattern(self) -> String {
        let body = match self {
            Self::Frontend => format!(r"\bFA\b.*?Logging event \(FE\):\s*{NAME}"),
            Self::Service => format!(r"\bFA-SVC\b.*?Logging event:\s*{NAME}"),
        };
        format!(r"^{TIMESTAMP}\s.*?{body}\s*$")
    }
}

impl fmt::Display for NameOnlyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontend => write!(f, "frontend"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Which matcher recognized a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    Bundle(BundleFormat),
    NameOnly(NameOnlyFormat),
    /// The "Invalid default event parameter type" warning.
    InvalidDefaultParam,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle(format) => write!(f, "bundle/{format}"),
            Self::NameOnly(format) => write!(f, "name_only/{format}"),
            Self::InvalidDefaultParam => write!(f, "invalid_default_param"),
        }
    }
}

/// One log layout.
///
/// Implementations must not panic on any input and must only return
/// extractions with a non-empty name.
pub trait LineMatcher: Send + Sync {
    fn format(&self) -> LogFormat;

    /// Recognizes `line`, or returns `None` when the layout does not apply.
    fn extract(&self, line: &str) -> Option<Extraction>;
}

fn captured_timestamp(caps: &Captures<'_>) -> Option<String> {
    caps.get(1).map(|m| m.as_str().to_string())
}

fn captured_name(caps: &Captures<'_>, group: usize) -> Option<EventName> {
    EventName::new(caps.get(group)?.as_str()).ok()
}

/// Matches a layout with a bundle blob and decodes the blob.
pub struct BundleMatcher {
    format: BundleFormat,
    pattern: Regex,
}

impl BundleMatcher {
    pub fn new(format: BundleFormat) -> Self {
        Self {
            format,
            pattern: Regex::new(&format.pattern()).unwrap(),
        }
    }
}

impl LineMatcher for BundleMatcher {
    fn format(&self) -> LogFormat {
        LogFormat::Bundle(self.format)
    }

    fn extract(&self, line: &str) -> Option<Extraction> {
        let caps = self.pattern.captures(line)?;
        let name = captured_name(&caps, 2)?;
        let decoded = bundle::decode(caps.get(3).map_or("", |m| m.as_str()));
        Some(Extraction {
            format: self.format(),
            name,
            raw_timestamp: captured_timestamp(&caps),
            parameters: decoded.parameters,
            items: decoded.items,
        })
    }
}

pub struct NameOnlyMatcher {
    format: NameOnlyFormat,
    pattern: Regex,
}

impl NameOnlyMatcher {
    pub fn new(format: NameOnlyFormat) -> Self {
        Self {
            format,
            pattern: Regex::new(&format.pattern()).unwrap(),
        }
    }
}

impl LineMatcher for NameOnlyMatcher {
    fn format(&self) -> LogFormat {
        LogFormat::NameOnly(self.format)
    }

    fn extract(&self, line: &str) -> Option<Extraction> {
        let caps = self.pattern.captures(line)?;
        Some(Extraction {
            format: self.format(),
            name: captured_name(&caps, 2)?,
            raw_timestamp: captured_timestamp(&caps),
            parameters: Params::new(),
            items: Vec::new(),
        })
    }
}

/// Turns the SDK's invalid-parameter warning into a pseudo-event named
/// `fa_invalid_default_param` whose only parameter is the offending one.
pub struct InvalidDefaultParamMatcher {
    pattern: Regex,
}

impl Default for InvalidDefaultParamMatcher {
    fn default() -> Self {
        let pattern = format!(
            r"^(?:{TIMESTAMP}\s)?.*?Invalid default event parameter type\. Name, value:\s*([^,]+?)\s*,\s*(.*?)\s*$"
        );
        Self {
            pattern: Regex::new(&pattern).unwrap(),
        }
    }
}

impl LineMatcher for InvalidDefaultParamMatcher {
    fn format(&self) -> LogFormat {
        LogFormat::InvalidDefaultParam
    }

    fn extract(&self, line: &str) -> Option<Extraction> {
        let caps = self.pattern.captures(line)?;
        let key = caps.get(2)?.as_str().to_string();
        let value = bundle::clean_value(caps.get(3).map_or("", |m| m.as_str()));
        Some(Extraction {
            format: self.format(),
            name: EventName::new(INVALID_DEFAULT_PARAM_EVENT).ok()?,
            raw_timestamp: captured_timestamp(&caps),
            parameters: Params::from([(key, value)]),
            items: Vec::new(),
        })
    }
}

/// An ordered chain of matchers; the first match wins.
pub struct LineParser {
    matchers: Vec<Box<dyn LineMatcher>>,
}

impl Default for LineParser {
    /// The bundle layouts, then the name-only layouts, then the diagnostic.
    fn default() -> Self {
        let mut matchers: Vec<Box<dyn LineMatcher>> = BundleFormat::ALL
            .into_iter()
            .map(|format| Box::new(BundleMatcher::new(format)) as Box<dyn LineMatcher>)
            .collect();
        matchers.push(Box::new(NameOnlyMatcher::new(NameOnlyFormat::Frontend)));
        matchers.push(Box::new(NameOnlyMatcher::new(NameOnlyFormat::Service)));
        matchers.push(Box::new(InvalidDefaultParamMatcher::default()));
        Self { matchers }
    }
}

impl LineParser {
    /// A parser with a custom matcher chain, tried in the given order.
    pub fn with_matchers(matchers: Vec<Box<dyn LineMatcher>>) -> Self {
        Self { matchers }
    }

    /// The shared parser with the standard chain.
    pub fn standard() -> &'static Self {
        &STANDARD_PARSER
    }

    /// Formats in the order they are tried.
    pub fn formats(&self) -> Vec<LogFormat> {
        self.matchers.iter().map(|m| m.format()).collect()
    }

    /// Runs the chain over one line without normalizing.
    pub fn extract(&self, line: &str) -> Option<Extraction> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        let extraction = self.matchers.iter().find_map(|m| m.extract(line))?;
        tracing::trace!(format = %extraction.format, name = %extraction.name, "matched line");
        Some(extraction)
    }

    /// Parses one line, resolving its timestamp against `reference`.
    pub fn parse_at<Tz: TimeZone>(
        &self,
        line: &str,
        reference: &DateTime<Tz>,
    ) -> Option<AnalyticsEvent> {
        self.extract(line)
            .map(|extraction| normalize(extraction, reference))
    }
}

/// Parses one line against the current local time.
pub fn parse(line: &str) -> Option<AnalyticsEvent> {
    parse_at(line, &Local::now())
}

/// Parses one line, resolving its timestamp against `reference`.
pub fn parse_at<Tz: TimeZone>(line: &str, reference: &DateTime<Tz>) -> Option<AnalyticsEvent> {
    LineParser::standard().parse_at(line, reference)
}
