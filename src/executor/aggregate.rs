//! Failure aggregation
//!
//! Collects failing responses in arrival order and turns them into the
//! verdict of a run.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::models::{Response, Status};

/// One failing unit and what its worker reported
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub unit_id: String,
    pub message: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit_id, self.message)
    }
}

/// Final verdict of the test phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(Vec<FailureRecord>),
}

impl Verdict {
    /// Every failing unit, empty on success
    pub fn failures(&self) -> &[FailureRecord] {
        match self {
            Verdict::Success => &[],
            Verdict::Failure(records) => records,
        }
    }
}

/// Serialized as the list of failures
impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.failures().serialize(serializer)
    }
}

/// Accumulates failures from a stream of responses
#[derive(Clone, Debug, Default)]
pub struct FailureAggregator {
    failures: Vec<FailureRecord>,
    responses: usize,
}

impl FailureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one response in; returns the new record if it failed
    pub fn record(&mut self, response: &Response) -> Option<&FailureRecord> {
        self.responses += 1;

        match &response.status {
            Status::Success => None,
            Status::Failure(message) => {
                self.failures.push(FailureRecord {
                    unit_id: response.unit_id.clone(),
                    message: message.clone(),
                });
                self.failures.last()
            }
        }
    }

    pub fn responses(&self) -> usize {
        self.responses
    }

    pub fn passed(&self) -> usize {
        self.responses - self.failures.len()
    }

    pub fn into_verdict(self) -> Verdict {
        if self.failures.is_empty() {
            Verdict::Success
        } else {
            Verdict::Failure(self.failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_passing_is_success() {
        let mut aggregator = FailureAggregator::new();
        for unit in ["a", "b", "c"] {
            assert!(aggregator.record(&Response::success(unit)).is_none());
        }

        assert_eq!(aggregator.responses(), 3);
        assert_eq!(aggregator.passed(), 3);
        assert_eq!(aggregator.into_verdict(), Verdict::Success);
    }

    #[test]
    fn test_failures_keep_arrival_order() {
        let mut aggregator = FailureAggregator::new();
        aggregator.record(&Response::failure("zeta", "first"));
        aggregator.record(&Response::success("beta"));
        aggregator.record(&Response::failure("alpha", "second"));

        assert_eq!(aggregator.passed(), 1);
        match aggregator.into_verdict() {
            Verdict::Failure(records) => {
                let lines: Vec<String> = records.iter().map(ToString::to_string).collect();
                assert_eq!(lines, vec!["zeta: first", "alpha: second"]);
            }
            Verdict::Success => panic!("expected failure verdict"),
        }
    }

    #[test]
    fn test_verdict_serializes_as_failure_list() {
        assert_eq!(
            serde_json::to_value(Verdict::Success).unwrap(),
            serde_json::json!([])
        );

        let mut aggregator = FailureAggregator::new();
        aggregator.record(&Response::failure("foo", "type error X"));
        assert_eq!(
            serde_json::to_value(aggregator.into_verdict()).unwrap(),
            serde_json::json!([{"unit_id": "foo", "message": "type error X"}])
        );
    }

    #[test]
    fn test_record_returns_new_failure() {
        let mut aggregator = FailureAggregator::new();
        let record = aggregator
            .record(&Response::failure("foo", "type error X"))
            .cloned();
        assert_eq!(
            record,
            Some(FailureRecord {
                unit_id: "foo".to_string(),
                message: "type error X".to_string(),
            })
        );
    }
}
