//! JSON answer parser
//!
//! Providers are asked to end their answer with a JSON object such as
//! `{"brand_mentioned": true, "rank": 2, "sentiment": 0.6, "cited_sources": [...]}`.
//! The first such object (fenced or bare) is extracted; anything unreadable
//! yields an explicit `parsed = false` outcome.

use diagnosis_domain::{AnswerParser, ParseOutcome, ParsedFields};
use serde_json::{Map, Value};

const RANK_KEYS: &[&str] = &["rank", "ranking", "position"];
const MENTION_KEYS: &[&str] = &["brand_mentioned", "mentioned"];
const SENTIMENT_KEYS: &[&str] = &["sentiment", "sentiment_score"];
const SOURCE_KEYS: &[&str] = &["cited_sources", "sources", "citations"];

#[derive(Debug, Default, Clone)]
pub struct JsonAnswerParser;

impl JsonAnswerParser {
    pub fn new() -> Self {
        Self
    }
}

impl AnswerParser for JsonAnswerParser {
    fn parse(&self, brand: &str, raw_text: &str) -> ParseOutcome {
        let Some(object) = first_json_object(raw_text) else {
            return ParseOutcome::failed("回答中没有找到JSON对象");
        };
        let object = brand_section(&object, brand).unwrap_or(&object);

        let has_any = [RANK_KEYS, MENTION_KEYS, SENTIMENT_KEYS, SOURCE_KEYS]
            .iter()
            .any(|keys| lookup(object, keys).is_some());
        if !has_any {
            return ParseOutcome::failed("JSON对象缺少评分字段");
        }

        let rank = lookup(object, RANK_KEYS).and_then(as_f64).map(normalize_rank);
        let mentioned = lookup(object, MENTION_KEYS)
            .and_then(as_bool)
            .unwrap_or(matches!(rank, Some(r) if r > 0));
        let rank = if mentioned { rank.unwrap_or(-1) } else { -1 };

        let sentiment = lookup(object, SENTIMENT_KEYS)
            .and_then(as_f64)
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(-1.0, 1.0))
            .unwrap_or(0.0);

        ParseOutcome::parsed(ParsedFields {
            brand_mentioned: mentioned,
            rank,
            sentiment,
            cited_sources: lookup(object, SOURCE_KEYS).map(as_sources).unwrap_or_default(),
        })
    }
}

/// Tries every `{` in order and returns the first one that starts a valid
/// JSON object; trailing prose after the object is ignored.
fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

/// Supports answers that report several brands: `{"Acme": {...}, "Globex": {...}}`
/// or `{"brands": {"Acme": {...}}}`.
fn brand_section<'a>(object: &'a Map<String, Value>, brand: &str) -> Option<&'a Map<String, Value>> {
    let find = |map: &'a Map<String, Value>| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(brand))
            .and_then(|(_, value)| value.as_object())
    };
    find(object).or_else(|| object.get("brands").and_then(Value::as_object).and_then(find))
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| object.get(*key))
        .filter(|v| !v.is_null())
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "是" => Some(true),
            "false" | "no" | "否" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// 1..=10, or -1 for "not ranked".
fn normalize_rank(rank: f64) -> i32 {
    if !rank.is_finite() || rank < 1.0 {
        -1
    } else {
        rank.round().min(10.0) as i32
    }
}

fn as_sources(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(map) => map
                    .get("url")
                    .or_else(|| map.get("title"))
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
