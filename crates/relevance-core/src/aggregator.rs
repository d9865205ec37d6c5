//! Run aggregation.
//!
//! The aggregator is the only component with cross-document state. It owns
//! one slot per submitted document, so outcomes land at their submission
//! index whatever order workers finish in.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

use crate::types::{ErrorKind, Outcome};

/// Message recorded for documents that never started.
pub const NOT_STARTED_MESSAGE: &str = "run ended before this document was processed";

/// Misuse of the aggregator. These indicate a bug in the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("run already finalized; no further outcomes accepted")]
    Finalized,

    #[error("outcome index {index} out of range for {len} documents")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("outcome for document {index} ('{document_id}') recorded twice")]
    AlreadyRecorded { index: usize, document_id: String },

    #[error("outcome for '{found}' recorded at slot {index}, which belongs to '{expected}'")]
    DocumentMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

#[derive(Debug)]
struct AggregatorState {
    slots: Vec<Option<Outcome>>,
    next: usize,
    finalized: bool,
}

/// Collects per-document outcomes into an ordered [`RunResult`].
#[derive(Debug)]
pub struct RunAggregator {
    document_ids: Vec<String>,
    started_at: DateTime<Utc>,
    state: Mutex<AggregatorState>,
}

impl RunAggregator {
    /// Create an aggregator for documents submitted in the given order.
    pub fn new<I, S>(document_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let document_ids: Vec<String> = document_ids.into_iter().map(Into::into).collect();
        let slots = vec![None; document_ids.len()];
        Self {
            document_ids,
            started_at: Utc::now(),
            state: Mutex::new(AggregatorState {
                slots,
                next: 0,
                finalized: false,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.document_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }

    /// Append an outcome at the next submission position.
    ///
    /// Returns the index it was recorded at.
    pub fn record(&self, outcome: Outcome) -> Result<usize, AggregatorError> {
        let mut state = self.state.lock();
        let index = state.next;
        self.store(&mut state, index, outcome)?;
        state.next = index + 1;
        Ok(index)
    }

    /// Record an outcome at an explicit submission index.
    pub fn record_at(&self, index: usize, outcome: Outcome) -> Result<(), AggregatorError> {
        let mut state = self.state.lock();
        self.store(&mut state, index, outcome)?;
        while state.next < state.slots.len() && state.slots[state.next].is_some() {
            state.next += 1;
        }
        Ok(())
    }

    fn store(
        &self,
        state: &mut AggregatorState,
        index: usize,
        outcome: Outcome,
    ) -> Result<(), AggregatorError> {
        if state.finalized {
            return Err(AggregatorError::Finalized);
        }
        let len = self.document_ids.len();
        let expected = self
            .document_ids
            .get(index)
            .ok_or(AggregatorError::IndexOutOfRange { index, len })?;
        if expected != outcome.document_id() {
            return Err(AggregatorError::DocumentMismatch {
                index,
                expected: expected.clone(),
                found: outcome.document_id().to_string(),
            });
        }
        if state.slots[index].is_some() {
            return Err(AggregatorError::AlreadyRecorded {
                index,
                document_id: expected.clone(),
            });
        }
        state.slots[index] = Some(outcome);
        Ok(())
    }

    /// Snapshot of the outcomes recorded so far, in submission order.
    pub fn completed(&self) -> Vec<Outcome> {
        self.state.lock().slots.iter().flatten().cloned().collect()
    }

    /// Close the run.
    ///
    /// Documents without an outcome are recorded as `Cancelled`, so the
    /// result always has exactly one entry per submitted document.
    pub fn finalize(&self) -> Result<RunResult, AggregatorError> {
        self.finalize_with_reason(NOT_STARTED_MESSAGE)
    }

    /// Like [`finalize`](Self::finalize), with a custom message for
    /// documents that never started.
    pub fn finalize_with_reason(&self, reason: &str) -> Result<RunResult, AggregatorError> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(AggregatorError::Finalized);
        }
        state.finalized = true;

        let outcomes = state
            .slots
            .iter_mut()
            .zip(&self.document_ids)
            .map(|(slot, id)| {
                slot.take().unwrap_or_else(|| {
                    Outcome::failure(id.clone(), ErrorKind::Cancelled, reason)
                })
            })
            .collect();

        Ok(RunResult {
            outcomes,
            started_at: self.started_at,
            finished_at: Utc::now(),
        })
    }
}

/// The ordered, immutable outcomes of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    outcomes: Vec<Outcome>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outcome> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Counts and token totals for reporting.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.outcomes.len(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            ..RunSummary::default()
        };
        for outcome in &self.outcomes {
            match outcome {
                Outcome::Success(record) => {
                    summary.succeeded += 1;
                    if let Some(usage) = record.usage {
                        summary.input_tokens += u64::from(usage.input_tokens);
                        summary.output_tokens += u64::from(usage.output_tokens);
                    }
                }
                Outcome::Failure(failure) => {
                    summary.failed += 1;
                    *summary.failures_by_kind.entry(failure.kind).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    /// Write one JSON object per outcome, one per line, in submission order.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for outcome in &self.outcomes {
            serde_json::to_writer(&mut writer, outcome)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

impl<'a> IntoIterator for &'a RunResult {
    type Item = &'a Outcome;
    type IntoIter = std::slice::Iter<'a, Outcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

/// Aggregate view of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, TopicSet, Usage};
    use crate::validator::ResponseValidator;

    fn success(id: &str) -> Outcome {
        ResponseValidator::new(TopicSet::all()).validate(
            r#"{"Coach Carter":1,"Oscars Slap":2,"Trump-Ukraine Meeting":3}"#,
            id,
            Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
        )
    }

    #[test]
    fn test_record_appends_in_order() {
        let agg = RunAggregator::new(["a", "b"]);
        assert_eq!(agg.record(success("a")), Ok(0));
        assert_eq!(agg.record(Outcome::failure("b", ErrorKind::Timeout, "slow")), Ok(1));

        let result = agg.finalize().unwrap();
        let ids: Vec<&str> = result.iter().map(|o| o.document_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_record_at_preserves_submission_order() {
        let docs = vec![
            Document::new("first", ""),
            Document::new("second", ""),
            Document::new("third", ""),
        ];
        let agg = RunAggregator::new(docs.iter().map(|d| d.id.clone()));

        agg.record_at(2, success("third")).unwrap();
        agg.record_at(0, success("first")).unwrap();
        agg.record_at(1, success("second")).unwrap();

        let result = agg.finalize().unwrap();
        let ids: Vec<&str> = result.iter().map(|o| o.document_id()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_record_after_finalize_is_an_error() {
        let agg = RunAggregator::new(["a", "b"]);
        agg.record(success("a")).unwrap();
        agg.finalize().unwrap();

        assert_eq!(agg.record(success("b")), Err(AggregatorError::Finalized));
        assert_eq!(
            agg.record_at(1, success("b")),
            Err(AggregatorError::Finalized)
        );
        assert!(matches!(agg.finalize(), Err(AggregatorError::Finalized)));
    }

    #[test]
    fn test_duplicate_and_mismatched_records_rejected() {
        let agg = RunAggregator::new(["a", "b"]);
        agg.record_at(0, success("a")).unwrap();

        assert!(matches!(
            agg.record_at(0, success("a")),
            Err(AggregatorError::AlreadyRecorded { index: 0, .. })
        ));
        assert!(matches!(
            agg.record_at(1, success("a")),
            Err(AggregatorError::DocumentMismatch { index: 1, .. })
        ));
        assert!(matches!(
            agg.record_at(7, success("a")),
            Err(AggregatorError::IndexOutOfRange { index: 7, len: 2 })
        ));
    }

    #[test]
    fn test_finalize_fills_unstarted_as_cancelled() {
        let agg = RunAggregator::new(["a", "b", "c"]);
        agg.record_at(1, success("b")).unwrap();

        let result = agg.finalize().unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.outcomes()[0].failure_kind(), Some(ErrorKind::Cancelled));
        assert!(result.outcomes()[1].is_success());
        assert_eq!(result.outcomes()[2].failure_kind(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_finalize_with_reason() {
        let agg = RunAggregator::new(["a"]);
        let result = agg.finalize_with_reason("aborted").unwrap();
        match &result.outcomes()[0] {
            Outcome::Failure(f) => assert_eq!(f.message, "aborted"),
            Outcome::Success(_) => panic!("Expected Cancelled failure"),
        }
    }

    #[test]
    fn test_completed_snapshot() {
        let agg = RunAggregator::new(["a", "b"]);
        assert!(agg.completed().is_empty());
        agg.record_at(1, success("b")).unwrap();
        let done = agg.completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].document_id(), "b");
    }

    #[test]
    fn test_summary_counts() {
        let agg = RunAggregator::new(["a", "b", "c"]);
        agg.record(success("a")).unwrap();
        agg.record(Outcome::failure("b", ErrorKind::Malformed, "bad")).unwrap();
        agg.record(Outcome::failure("c", ErrorKind::Malformed, "bad")).unwrap();

        let summary = agg.finalize().unwrap().summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures_by_kind.get(&ErrorKind::Malformed), Some(&2));
        assert_eq!(summary.input_tokens, 10);
        assert_eq!(summary.output_tokens, 5);
    }

    #[test]
    fn test_write_jsonl_one_line_per_outcome() {
        let agg = RunAggregator::new(["a", "b"]);
        agg.record(success("a")).unwrap();
        agg.record(Outcome::failure("b", ErrorKind::Auth, "denied")).unwrap();
        let result = agg.finalize().unwrap();

        let mut buf = Vec::new();
        result.write_jsonl(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["document_id"], "a");
        assert_eq!(lines[0]["scores"]["Trump-Ukraine Meeting"], 3);
        assert_eq!(lines[0]["usage"]["output_tokens"], 5);
        assert_eq!(lines[1]["document_id"], "b");
        assert_eq!(lines[1]["error"]["kind"], "auth");
    }
}
