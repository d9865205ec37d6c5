//! Core data model shared by every stage of the scoring pipeline.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A subject every document is scored against.
///
/// The set is closed and fixed at build time. Declaration order is the
/// canonical order used in prompts and persisted score maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Coach Carter (2005 movie)
    CoachCarter,

    /// The 2022 Oscars slap
    OscarsSlap,

    /// The Trump–Zelenskyy White House meeting
    TrumpZelenskyyMeeting,
}

impl Topic {
    /// Every topic, in canonical order.
    pub const ALL: [Topic; 3] = [
        Topic::CoachCarter,
        Topic::OscarsSlap,
        Topic::TrumpZelenskyyMeeting,
    ];

    /// The JSON key the backend must use for this topic.
    ///
    /// This is the only place labels are defined; prompt construction and
    /// response validation both read it.
    pub fn label(self) -> &'static str {
        match self {
            Topic::CoachCarter => "Coach Carter",
            Topic::OscarsSlap => "Oscars Slap",
            Topic::TrumpZelenskyyMeeting => "Trump-Ukraine Meeting",
        }
    }

    /// Human-readable description embedded in the judging prompt.
    pub fn description(self) -> &'static str {
        match self {
            Topic::CoachCarter => "Coach Carter (2005 movie)",
            Topic::OscarsSlap => "The 2022 Oscars slap (Will Smith and Chris Rock)",
            Topic::TrumpZelenskyyMeeting => "The Trump–Zelenskyy White House meeting",
        }
    }

    /// Look up a topic by its canonical label.
    pub fn from_label(label: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.label() == label)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors building a [`TopicSet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicSetError {
    #[error("topic set must not be empty")]
    Empty,

    #[error("topic listed more than once: {0}")]
    Duplicate(Topic),
}

/// An ordered, non-empty, duplicate-free selection of topics for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Topic>", into = "Vec<Topic>")]
pub struct TopicSet(Vec<Topic>);

impl TopicSet {
    /// Build a topic set, rejecting empty or repeated selections.
    pub fn new(topics: Vec<Topic>) -> Result<Self, TopicSetError> {
        if topics.is_empty() {
            return Err(TopicSetError::Empty);
        }
        for (i, topic) in topics.iter().enumerate() {
            if topics[..i].contains(topic) {
                return Err(TopicSetError::Duplicate(*topic));
            }
        }
        Ok(Self(topics))
    }

    /// All topics in canonical order.
    pub fn all() -> Self {
        Self(Topic::ALL.to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = Topic> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.0.contains(&topic)
    }

    /// Find the selected topic carrying `label`, if any.
    pub fn by_label(&self, label: &str) -> Option<Topic> {
        self.iter().find(|t| t.label() == label)
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        Self::all()
    }
}

impl TryFrom<Vec<Topic>> for TopicSet {
    type Error = TopicSetError;

    fn try_from(topics: Vec<Topic>) -> Result<Self, Self::Error> {
        Self::new(topics)
    }
}

impl From<TopicSet> for Vec<Topic> {
    fn from(set: TopicSet) -> Self {
        set.0
    }
}

/// A single input document. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Non-empty identifier (the file name for directory sources)
    pub id: String,

    /// Full UTF-8 text
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// The judging prompt handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    /// Instructions, rubric, defensive framing and output format
    pub system_instruction: String,

    /// The delimited document text
    pub user_content: String,
}

/// Token usage reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Validated per-topic scores, each in `[0, 100]`.
///
/// Serialized as a map from topic label to score, in canonical topic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scores(BTreeMap<Topic, u8>);

impl Scores {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, topic: Topic, score: u8) {
        self.0.insert(topic, score);
    }

    pub fn get(&self, topic: Topic) -> Option<u8> {
        self.0.get(&topic).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Topic, u8)> + '_ {
        self.0.iter().map(|(t, s)| (*t, *s))
    }
}

impl Serialize for Scores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (topic, score) in &self.0 {
            map.serialize_entry(topic.label(), score)?;
        }
        map.end()
    }
}

/// A successfully validated judgment for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRecord {
    pub document_id: String,
    pub scores: Scores,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Classification of a per-document failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential or permission problem
    Auth,
    /// Provider-side throttling
    RateLimited,
    /// The call did not complete in time
    Timeout,
    /// Connectivity or temporary server-side failure
    Transient,
    /// The backend answered but the content violates the contracted schema
    Malformed,
    /// Unclassified backend failure
    Unknown,
    /// The run was cancelled before this document finished
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub document_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(document_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            kind,
            message: message.into(),
        }
    }
}

// Persisted as `{"document_id": .., "error": {"kind": .., "message": ..}}`.
impl Serialize for Failure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            kind: ErrorKind,
            message: &'a str,
        }

        let mut s = serializer.serialize_struct("Failure", 2)?;
        s.serialize_field("document_id", &self.document_id)?;
        s.serialize_field(
            "error",
            &ErrorBody {
                kind: self.kind,
                message: &self.message,
            },
        )?;
        s.end()
    }
}

/// The per-document result of the pipeline. Exactly one per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Success(ScoreRecord),
    Failure(Failure),
}

impl Outcome {
    pub fn failure(document_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure(Failure::new(document_id, kind, message))
    }

    pub fn document_id(&self) -> &str {
        match self {
            Outcome::Success(record) => &record.document_id,
            Outcome::Failure(failure) => &failure.document_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn as_success(&self) -> Option<&ScoreRecord> {
        match self {
            Outcome::Success(record) => Some(record),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure kind, or `None` for a success.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_labels_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_label(topic.label()), Some(topic));
        }
        assert_eq!(Topic::from_label("coach carter"), None);
    }

    #[test]
    fn test_topic_set_rejects_empty_and_duplicates() {
        assert_eq!(TopicSet::new(vec![]), Err(TopicSetError::Empty));
        assert_eq!(
            TopicSet::new(vec![Topic::OscarsSlap, Topic::OscarsSlap]),
            Err(TopicSetError::Duplicate(Topic::OscarsSlap))
        );
        assert_eq!(TopicSet::all().len(), 3);
    }

    #[test]
    fn test_topic_set_deserializes_variant_names() {
        let set: TopicSet = serde_json::from_str(r#"["OscarsSlap", "CoachCarter"]"#).unwrap();
        let topics: Vec<Topic> = set.iter().collect();
        assert_eq!(topics, vec![Topic::OscarsSlap, Topic::CoachCarter]);

        let dup: Result<TopicSet, _> = serde_json::from_str(r#"["OscarsSlap", "OscarsSlap"]"#);
        assert!(dup.is_err());
    }

    #[test]
    fn test_success_serializes_labels_and_usage() {
        let mut scores = Scores::new();
        scores.insert(Topic::OscarsSlap, 5);
        scores.insert(Topic::CoachCarter, 90);
        let outcome = Outcome::Success(ScoreRecord {
            document_id: "a".to_string(),
            scores,
            usage: Some(Usage {
                input_tokens: 12,
                output_tokens: 3,
            }),
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["document_id"], "a");
        assert_eq!(json["scores"]["Coach Carter"], 90);
        assert_eq!(json["scores"]["Oscars Slap"], 5);
        assert_eq!(json["usage"]["input_tokens"], 12);

        // Canonical topic order, not insertion order
        let text = serde_json::to_string(&outcome).unwrap();
        assert!(text.find("Coach Carter").unwrap() < text.find("Oscars Slap").unwrap());
    }

    #[test]
    fn test_success_without_usage_omits_field() {
        let outcome = Outcome::Success(ScoreRecord {
            document_id: "b".to_string(),
            scores: Scores::new(),
            usage: None,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("usage").is_none());
    }

    #[test]
    fn test_failure_serializes_error_object() {
        let outcome = Outcome::failure("c", ErrorKind::RateLimited, "throttled");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["document_id"], "c");
        assert_eq!(json["error"]["kind"], "rate_limited");
        assert_eq!(json["error"]["message"], "throttled");
        assert!(json.get("scores").is_none());
    }
}
