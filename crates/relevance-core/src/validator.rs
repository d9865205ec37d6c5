//! Response validation turns raw backend text into a [`ScoreRecord`].
//!
//! The model produces a JSON object; the validator decides whether it is
//! usable. Nothing is clamped, defaulted or guessed: a response is either
//! complete and in range, or the document gets a `Malformed` failure.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::types::{ErrorKind, Outcome, ScoreRecord, Scores, TopicSet, Usage};

lazy_static! {
    /// A response wrapped in one Markdown code fence, optionally tagged.
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n[ \t]*```\s*$").unwrap();
}

/// Why a response could not be turned into a score record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response is a JSON {0}, expected an object")]
    NotAnObject(&'static str),

    #[error("response repeats topic key '{0}'")]
    DuplicateTopic(String),

    #[error("response is missing topic keys: {}", .0.join(", "))]
    MissingTopics(Vec<String>),

    #[error("score for '{label}' is not an integer: {value}")]
    NotInteger { label: String, value: String },

    #[error("score for '{label}' is outside 0-100: {value}")]
    OutOfRange { label: String, value: String },
}

/// Validates backend output against the run's topic set.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    topics: TopicSet,
}

impl ResponseValidator {
    pub fn new(topics: TopicSet) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Validate `raw` and produce the document's outcome.
    ///
    /// Never panics and never returns an error: every problem becomes an
    /// `Outcome::Failure` with kind `Malformed`.
    pub fn validate(&self, raw: &str, document_id: &str, usage: Option<Usage>) -> Outcome {
        match self.parse_scores(raw, document_id) {
            Ok(scores) => Outcome::Success(ScoreRecord {
                document_id: document_id.to_string(),
                scores,
                usage,
            }),
            Err(e) => Outcome::failure(document_id, ErrorKind::Malformed, e.to_string()),
        }
    }

    /// Parse and check scores without building an outcome.
    pub fn parse_scores(&self, raw: &str, document_id: &str) -> Result<Scores, ValidationError> {
        let (object, keys) = parse_object(raw)?;

        let mut seen = Vec::with_capacity(keys.len());
        for key in keys {
            if self.topics.by_label(&key).is_some() {
                if seen.contains(&key) {
                    return Err(ValidationError::DuplicateTopic(key));
                }
                seen.push(key);
            }
        }

        let missing: Vec<String> = self
            .topics
            .iter()
            .filter(|t| !object.contains_key(t.label()))
            .map(|t| t.label().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingTopics(missing));
        }

        for key in object.keys() {
            if self.topics.by_label(key).is_none() {
                tracing::warn!(document_id, key = %key, "Dropping unexpected key from model response");
            }
        }

        let mut scores = Scores::new();
        for topic in self.topics.iter() {
            let value = &object[topic.label()];
            scores.insert(topic, score_value(topic.label(), value)?);
        }
        Ok(scores)
    }
}

/// The top-level object plus its keys in source order, repeats included.
fn parse_object(raw: &str) -> Result<(Map<String, Value>, Vec<String>), ValidationError> {
    let body = match CODE_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => raw,
    };
    let body = body.trim();

    let value: Value =
        serde_json::from_str(body).map_err(|e| ValidationError::NotJson(e.to_string()))?;

    match value {
        Value::Object(map) => {
            let RawKeys(keys) =
                serde_json::from_str(body).map_err(|e| ValidationError::NotJson(e.to_string()))?;
            Ok((map, keys))
        }
        other => Err(ValidationError::NotAnObject(json_type_name(&other))),
    }
}

// `Map` keeps only the last of repeated keys, so they are collected separately.
struct RawKeys(Vec<String>);

impl<'de> Deserialize<'de> for RawKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = RawKeys;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawKeys, A::Error> {
                let mut keys = Vec::new();
                while let Some((key, _)) = access.next_entry::<String, serde::de::IgnoredAny>()? {
                    keys.push(key);
                }
                Ok(RawKeys(keys))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

/// Accept integers and integer-valued floats in `[0, 100]`.
fn score_value(label: &str, value: &Value) -> Result<u8, ValidationError> {
    let not_integer = || ValidationError::NotInteger {
        label: label.to_string(),
        value: value.to_string(),
    };
    let out_of_range = || ValidationError::OutOfRange {
        label: label.to_string(),
        value: value.to_string(),
    };

    let Value::Number(number) = value else {
        return Err(not_integer());
    };

    let integer = if let Some(i) = number.as_i64() {
        i
    } else if let Some(u) = number.as_u64() {
        // Larger than i64::MAX
        return Err(if u > 100 { out_of_range() } else { not_integer() });
    } else {
        let f = number.as_f64().ok_or_else(not_integer)?;
        if !f.is_finite() || f.fract() != 0.0 {
            return Err(not_integer());
        }
        if !(0.0..=100.0).contains(&f) {
            return Err(out_of_range());
        }
        f as i64
    };

    u8::try_from(integer)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or_else(out_of_range)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
