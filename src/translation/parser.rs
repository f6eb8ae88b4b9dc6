/*!
 * Response parsing for numbered, JSON array and pair layouts.
 */

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::prompts::ResponseFormat;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\.(?:\s+(.*))?$").expect("Invalid numbered line regex"));

/// Items recovered from a numbered response, keyed by their 1-based number
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberedResponse {
    pub items: BTreeMap<usize, String>,
}

impl NumberedResponse {
    /// Numbers in `1..=expected` with no item
    pub fn missing(&self, expected: usize) -> Vec<usize> {
        (1..=expected).filter(|n| !self.items.contains_key(n)).collect()
    }

    pub fn get(&self, number: usize) -> Option<&str> {
        self.items.get(&number).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parse `<n>. <text>` lines
///
/// Lines that do not start a new item continue the previous one. Code fence
/// lines are dropped, and when a number repeats the first occurrence wins.
pub fn parse_numbered(text: &str) -> NumberedResponse {
    let mut items: BTreeMap<usize, String> = BTreeMap::new();
    // Item currently collecting continuation lines; None after a duplicate
    let mut current: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            continue;
        }

        if let Some(caps) = NUMBERED_LINE.captures(line) {
            let number = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
            if let Some(number) = number {
                let body = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                if items.contains_key(&number) {
                    current = None;
                } else {
                    items.insert(number, body.to_string());
                    current = Some(number);
                }
                continue;
            }
        }

        if trimmed.is_empty() {
            continue;
        }
        if let Some(item) = current.and_then(|n| items.get_mut(&n)) {
            if !item.is_empty() {
                item.push(' ');
            }
            item.push_str(trimmed);
        }
    }

    NumberedResponse { items }
}

/// Parse a JSON array of strings, tolerating text around it
pub fn parse_json_items(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&text[start..=end]).ok()
}

/// Parse a response in the requested format into numbered items
///
/// A JSON answer that cannot be read falls back to numbered parsing.
pub fn parse_response(text: &str, format: ResponseFormat) -> NumberedResponse {
    if format == ResponseFormat::JsonArray {
        if let Some(items) = parse_json_items(text) {
            return NumberedResponse {
                items: items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (i + 1, item.trim().to_string()))
                    .collect(),
            };
        }
    }
    parse_numbered(text)
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    #[serde(default)]
    top: String,
    #[serde(default)]
    bottom: String,
}

/// Parse a `{"top": .., "bottom": ..}` object, tolerating code fences and chatter
pub fn parse_pair(text: &str) -> Option<(String, String)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let pair: PairResponse = serde_json::from_str(&text[start..=end]).ok()?;
    let top = pair.top.trim().to_string();
    let bottom = pair.bottom.trim().to_string();
    if top.is_empty() && bottom.is_empty() {
        return None;
    }
    Some((top, bottom))
}
