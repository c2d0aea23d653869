//! Decoding of Android `Bundle` text into flat parameter maps.
//!
//! Firebase Analytics prints event parameters with `Bundle.toString()`:
//!
//! ```text
//! Bundle[{currency=USD, value=Double(9.99), items=[Bundle[{item_id=sku1}]]}]
//! ```
//!
//! The text is loosely specified, frequently truncated by logcat and differs
//! between SDK versions. Decoding is therefore a total function: it never
//! fails, and returns whatever it could recover.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::Params;

/// Prefix of a serialized bundle.
const BUNDLE_PREFIX: &str = "Bundle[";

/// Reserved key holding nested item bundles.
const ITEMS_KEY: &str = "items";

/// Below this many keys the permissive comma-splitting pass also runs.
const MIN_KEYS_BEFORE_FALLBACK: usize = 3;

/// Parameter key, with an optional Firebase alias suffix such as `(_o)`.
/// Group 1 is the key without the alias.
const KEY: &str = r"([A-Za-z_][A-Za-z0-9_.]*)(?:\([A-Za-z0-9_]*\))?";

/// A value wrapped in a type name, e.g. `Long(5)` or `String(a, b)`.
static WRAPPED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\w+\((.*)\)$").unwrap());

/// Locates the start of the nested items list.
static ITEMS_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bitems(?:\([A-Za-z0-9_]*\))?\s*=\s*\[").unwrap());

/// Key/value pattern families, applied in this order over the whole text.
///
/// Every family runs independently; when two families yield the same key the
/// later one wins. The order puts the most precise readings of a value last
/// so that, for example, `k=String(a, b)` ends up as `a, b` rather than the
/// `String(a` that the plain family sees.
static PATTERN_FAMILIES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("plain", format!(r"\b{KEY}=([^,}}]*)")),
        (
            "wrapped",
            format!(r"\b{KEY}\s*=\s*([A-Za-z]\w*\(.*?\))\s*(?:,|\}}|\]|$)"),
        ),
        ("double_quoted", format!(r#"\b{KEY}\s*=\s*"([^"]*)""#)),
        ("single_quoted", format!(r"\b{KEY}\s*=\s*'([^']*)'")),
        ("colon", format!(r"(?:^|[\s,{{\[]){KEY}:\s*([^,}}]+)")),
        ("spaced_colon", format!(r"(?:^|[\s,{{\[]){KEY}\s+:\s*([^,}}]+)")),
        (
            "loose",
            format!(r#"\b{KEY}\s+=\s*([^,}}()\s"'][^,}}()]*?)\s*(?:,|\}}|$)"#),
        ),
    ]
    .into_iter()
    .map(|(family, pattern)| (family, Regex::new(&pattern).unwrap()))
    .collect()
});

/// The result of decoding one bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBundle {
    /// Every key/value pair found in the text. Never contains the `items` key.
    pub parameters: Params,
    /// One map per nested item bundle. Never contains empty maps.
    pub items: Vec<Params>,
}

impl DecodedBundle {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.items.is_empty()
    }
}

/// Decodes a bundle blob into parameters and nested items.
///
/// The pattern families read the whole text, item blocks included, so keys
/// inside items also land in `parameters` (the last occurrence wins). Only
/// the `items` key itself is reserved.
pub fn decode(text: &str) -> DecodedBundle {
    let inner = unwrap_bundle(text);
    let items = find_items_list(inner).map_or_else(Vec::new, |list| decode_items(&inner[list]));
    let mut parameters = extract_pairs(inner);
    if parameters.len() < MIN_KEYS_BEFORE_FALLBACK && !inner.trim().is_empty() {
        fill_from_segments(inner, &mut parameters);
    }

    if parameters.is_empty() && items.is_empty() && !inner.trim().is_empty() {
        tracing::trace!(text, "bundle text yielded no parameters");
    }

    DecodedBundle { parameters, items }
}

/// Normalizes a raw parameter value to plain text.
///
/// Unwraps a `Type(payload)` wrapper whatever the type name, then strips one
/// matching layer each of double quotes, single quotes, parentheses, square
/// brackets and curly braces. Clean values are returned unchanged.
pub fn clean_value(raw: &str) -> String {
    let mut value = raw.trim();
    if let Some(payload) = WRAPPED_VALUE.captures(value).and_then(|c| c.get(1)) {
        value = payload.as_str();
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('(', ')'), ('[', ']'), ('{', '}')] {
        if value.len() >= 2 && value.starts_with(open) && value.ends_with(close) {
            value = &value[1..value.len() - 1];
        }
    }
    value.trim().to_string()
}

/// Runs every pattern family over `text`. Skips the `items` key.
fn extract_pairs(text: &str) -> Params {
    let mut params = Params::new();
    for (family, pattern) in PATTERN_FAMILIES.iter() {
        for caps in pattern.captures_iter(text) {
            let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let key = key.as_str();
            if key.eq_ignore_ascii_case(ITEMS_KEY) {
                continue;
            }
            tracing::trace!(family, key, "bundle pair");
            params.insert(key.to_string(), clean_value(value.as_str()));
        }
    }
    params
}

/// Permissive pass: splits on top-level commas and takes the first `:` or
/// `=` of each segment as the separator. Only fills keys not yet present.
fn fill_from_segments(text: &str, params: &mut Params) {
    for segment in split_top_level(text) {
        let Some(sep) = segment.find([':', '=']) else {
            continue;
        };
        let key = strip_key_alias(segment[..sep].trim());
        let value = segment[sep + 1..].trim();
        if key.is_empty()
            || key.eq_ignore_ascii_case(ITEMS_KEY)
            || value.starts_with('[')
            || value.starts_with('{')
        {
            continue;
        }
        params
            .entry(key.to_string())
            .or_insert_with(|| clean_value(value));
    }
}

/// Drops a trailing `(_alias)` from a key, keeping the key if nothing precedes it.
fn strip_key_alias(key: &str) -> &str {
    if key.ends_with(')') {
        if let Some(open) = key.find('(') {
            if open > 0 {
                return key[..open].trim_end();
            }
        }
    }
    key
}

/// Content between the brackets of the `items=[...]` entry. Runs to the end
/// of the text when the list is truncated.
fn find_items_list(text: &str) -> Option<Range<usize>> {
    let m = ITEMS_START.find(text)?;
    let open = m.end() - 1;
    let close = matching_close(text, open).unwrap_or(text.len());
    Some(open + 1..close)
}

/// Decodes each `Bundle[{...}]` (or bare `{...}`) block of an items list.
fn decode_items(list: &str) -> Vec<Params> {
    let bytes = list.as_bytes();
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let open = if bytes[pos..].starts_with(BUNDLE_PREFIX.as_bytes()) {
            pos + BUNDLE_PREFIX.len() - 1
        } else if bytes[pos] == b'{' {
            pos
        } else {
            pos += 1;
            continue;
        };
        let end = matching_close(list, open).map_or(list.len(), |close| close + 1);
        let block = unwrap_bundle(&list[pos..end]);
        let item = extract_pairs(block);
        if item.is_empty() {
            tracing::trace!(block, "dropping empty item bundle");
        } else {
            items.push(item);
        }
        pos = end;
    }
    items
}

/// Strips the `Bundle[` ... `]` wrapper and one layer of braces.
///
/// Tolerates truncation: an unterminated wrapper runs to the end of the text.
fn unwrap_bundle(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = if trimmed.starts_with(BUNDLE_PREFIX) {
        let open = BUNDLE_PREFIX.len() - 1;
        let end = matching_close(trimmed, open).unwrap_or(trimmed.len());
        trimmed[open + 1..end].trim()
    } else {
        trimmed
    };
    let inner = inner.strip_prefix('{').unwrap_or(inner);
    inner.strip_suffix('}').unwrap_or(inner)
}

/// Index of the bracket closing the one at `open`, counting `[`/`{` and
/// `]`/`}` as one nesting depth. `None` when the text ends first.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in text.as_bytes().get(open..)?.iter().enumerate() {
        match byte {
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas that are not nested in brackets, braces or parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, byte) in text.bytes().enumerate() {
        match byte {
            b'[' | b'{' | b'(' => depth += 1,
            b']' | b'}' | b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                segments.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);
    segments
}
