//! Run summary produced by the runner.

use std::fmt;
use std::time::Duration;

use crate::error::PipelineError;

/// Upper bound on failures kept in a report; counters are never capped.
pub const MAX_RECORDED_FAILURES: usize = 1000;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the chain a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Mapping,
    Processing,
    Sink,
    Flush,
}

/// One non-fatal (or the single fatal) failure observed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// `None` for failures outside any record (flush).
    pub position: Option<u64>,
    pub stage: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Counters and outcome of one pipeline run.
///
/// `read == filtered + processed + failed` holds for every report the
/// runner returns, completed or aborted.
#[derive(Debug)]
pub struct PipelineReport {
    name: String,
    state: RunState,
    read: u64,
    filtered: u64,
    processed: u64,
    failed: u64,
    duration: Duration,
    failures: Vec<RecordFailure>,
    dropped_failures: u64,
    cause: Option<PipelineError>,
}

impl PipelineReport {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RunState::Idle,
            read: 0,
            filtered: 0,
            processed: 0,
            failed: 0,
            duration: Duration::ZERO,
            failures: Vec::new(),
            dropped_failures: 0,
            cause: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Recorded failures, oldest first, at most [`MAX_RECORDED_FAILURES`].
    pub fn failures(&self) -> &[RecordFailure] {
        &self.failures
    }

    /// Failures that happened but were not kept because the list was full.
    pub fn dropped_failures(&self) -> u64 {
        self.dropped_failures
    }

    /// Why the run aborted; `None` unless `state()` is `Aborted`.
    pub fn cause(&self) -> Option<&PipelineError> {
        self.cause.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn is_consistent(&self) -> bool {
        self.read == self.filtered + self.processed + self.failed
    }

    /// `Ok(report)` for completed runs, the abort cause otherwise.
    pub fn into_result(mut self) -> Result<PipelineReport, PipelineError> {
        match self.cause.take() {
            Some(cause) => Err(cause),
            None => Ok(self),
        }
    }

    // -- runner-side mutation --

    pub(crate) fn start(&mut self) {
        self.state = RunState::Running;
    }

    pub(crate) fn record_read(&mut self) {
        self.read += 1;
    }

    pub(crate) fn record_filtered(&mut self) {
        self.filtered += 1;
    }

    pub(crate) fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub(crate) fn record_failed(&mut self, failure: RecordFailure) {
        self.failed += 1;
        self.keep(failure);
    }

    /// Failure that is not tied to a record and does not touch counters.
    pub(crate) fn record_flush_failure(&mut self, failure: RecordFailure) {
        self.keep(failure);
    }

    fn keep(&mut self, failure: RecordFailure) {
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(failure);
        } else {
            self.dropped_failures += 1;
        }
    }

    pub(crate) fn complete(mut self, duration: Duration) -> Self {
        self.state = RunState::Completed;
        self.duration = duration;
        self
    }

    pub(crate) fn abort(mut self, cause: PipelineError, duration: Duration) -> Self {
        self.state = RunState::Aborted;
        self.duration = duration;
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} read -> {} processed, {} filtered, {} failed in {:.3}s",
            self.name,
            self.state,
            self.read,
            self.processed,
            self.filtered,
            self.failed,
            self.duration.as_secs_f64()
        )?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}
