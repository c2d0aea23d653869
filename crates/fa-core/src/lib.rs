//! Parsing engine for Firebase Analytics events in Android logcat output.
//!
//! This crate contains:
//! - Line parsing: an ordered chain of matchers for the SDK's log layouts
//! - Bundle decoding: `Bundle[{...}]` text into flat parameter maps and items
//! - Normalization: year inference for logcat timestamps and event identity
//!
//! ```
//! let line = "01-05 10:00:00.123  1234  5678 I FA      : Logging event (FE): add_to_cart, Bundle[{item_id=sku1}]";
//! let event = fa_core::parse(line).unwrap();
//! assert_eq!(event.name, "add_to_cart");
//! ```

pub mod bundle;
pub mod event;
pub mod normalize;
pub mod parser;
pub mod types;

pub use bundle::{DecodedBundle, clean_value};
pub use event::{AnalyticsEvent, INVALID_DEFAULT_PARAM_EVENT};
pub use normalize::{Extraction, normalize, resolve_timestamp};
pub use parser::{
    BundleFormat, LineMatcher, LineParser, LogFormat, NameOnlyFormat, parse, parse_at,
};
pub use types::{EventId, EventName, Params, ValidationError};
