//! Record-at-a-time runner.
//!
//! Pulls one raw record from the source, pushes it through filters, mapper,
//! processors and sink, and only then pulls the next. After the source is
//! exhausted every stage is flushed in declared order.

use std::time::Instant;

use tracing::{debug, error, info, info_span, warn};

use crate::error::{MapFailure, PipelineError};
use crate::pipeline::{Pipeline, Slot};
use crate::record::RawRecord;
use crate::report::{FailureKind, PipelineReport, RecordFailure};
use crate::source::RecordSource;
use crate::stage::{ErrorPolicy, Outcome, RecordFilter, RecordMapper, RecordProcessor, RecordSink};

type Processors<'a, T> = [Slot<Box<dyn RecordProcessor<T> + 'a>>];
type Sink<'a, T> = Option<Slot<Box<dyn RecordSink<T> + 'a>>>;

/// How a single record left the chain.
enum Disposition {
    Filtered,
    Processed,
    Failed(RecordFailure),
    Fatal(RecordFailure, PipelineError),
}

/// Closes the source exactly once, on every exit path including unwinding.
struct SourceGuard<'a, P> {
    source: &'a mut dyn RecordSource<Payload = P>,
    open: bool,
}

impl<'a, P> SourceGuard<'a, P> {
    fn new(source: &'a mut dyn RecordSource<Payload = P>) -> Self {
        Self { source, open: true }
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<P>>> {
        self.source.next()
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.source.close() {
            Ok(()) => debug!(source = self.source.name(), "source closed"),
            Err(e) => warn!(source = self.source.name(), error = %format!("{e:#}"), "failed to close source"),
        }
    }
}

impl<P> Drop for SourceGuard<'_, P> {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn execute<P, T>(pipeline: Pipeline<'_, P, T>) -> PipelineReport {
    let Pipeline {
        name,
        source,
        filters,
        mapper,
        mut processors,
        mut sink,
        limit,
        ..
    } = pipeline;

    let span = info_span!("pipeline", name = %name);
    let _enter = span.enter();

    let started = Instant::now();
    let source_name = source.name().to_string();
    let mut report = PipelineReport::new(name);
    report.start();
    info!(source = %source_name, stages = processors.len() + usize::from(sink.is_some()), "run started");

    if let Err(cause) = source.open() {
        let err = PipelineError::SourceUnavailable {
            source_name,
            cause,
        };
        error!(error = %err, "run aborted");
        return report.abort(err, started.elapsed());
    }

    let mut guard = SourceGuard::new(source);
    let result = drive(
        &mut guard,
        &source_name,
        &filters,
        mapper.as_ref(),
        &mut processors,
        &mut sink,
        limit,
        &mut report,
    )
    .and_then(|()| flush(&mut processors, &mut sink, &mut report));
    if result.is_err() {
        abort_sink(&mut sink, &mut report);
    }
    guard.close();

    let report = match result {
        Ok(()) => report.complete(started.elapsed()),
        Err(err) => {
            error!(error = %err, "run aborted");
            report.abort(err, started.elapsed())
        }
    };
    info!(
        state = %report.state(),
        read = report.read(),
        filtered = report.filtered(),
        processed = report.processed(),
        failed = report.failed(),
        elapsed_ms = report.duration().as_millis() as u64,
        "run finished"
    );
    report
}

#[allow(clippy::too_many_arguments)]
fn drive<P, T>(
    guard: &mut SourceGuard<'_, P>,
    source_name: &str,
    filters: &[Box<dyn RecordFilter<P> + '_>],
    mapper: &dyn RecordMapper<P, T>,
    processors: &mut Processors<'_, T>,
    sink: &mut Sink<'_, T>,
    limit: Option<u64>,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let mut previous = 0;
    loop {
        if let Some(max) = limit
            && report.read() >= max
        {
            debug!(limit = max, "record limit reached");
            return Ok(());
        }

        let record = match guard.next() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(cause) => {
                return Err(PipelineError::Source {
                    source_name: source_name.to_string(),
                    position: previous,
                    cause,
                });
            }
        };

        let position = record.position();
        if position <= previous {
            return Err(PipelineError::OutOfOrder {
                source_name: source_name.to_string(),
                previous,
                got: position,
            });
        }
        previous = position;
        report.record_read();

        match handle_record(record, filters, mapper, processors, sink) {
            Disposition::Filtered => report.record_filtered(),
            Disposition::Processed => report.record_processed(),
            Disposition::Failed(failure) => {
                warn!(
                    position,
                    stage = %failure.stage,
                    reason = %failure.reason,
                    "record failed"
                );
                report.record_failed(failure);
            }
            Disposition::Fatal(failure, err) => {
                report.record_failed(failure);
                return Err(err);
            }
        }
    }
}

fn handle_record<P, T>(
    record: RawRecord<P>,
    filters: &[Box<dyn RecordFilter<P> + '_>],
    mapper: &dyn RecordMapper<P, T>,
    processors: &mut Processors<'_, T>,
    sink: &mut Sink<'_, T>,
) -> Disposition {
    let position = record.position();

    for filter in filters {
        match filter.accepts(&record) {
            Ok(true) => {}
            Ok(false) => {
                debug!(position, filter = filter.name(), "record filtered");
                return Disposition::Filtered;
            }
            Err(e) => {
                debug!(position, filter = filter.name(), error = %format!("{e:#}"), "filter error, rejecting");
                return Disposition::Filtered;
            }
        }
    }

    let mut item = match mapper.map(&record) {
        Ok(item) => item,
        Err(MapFailure::Invalid(e)) => {
            return Disposition::Failed(failure(Some(position), "mapper", FailureKind::Mapping, e.reason));
        }
        Err(MapFailure::Infrastructure(cause)) => {
            let reason = format!("{cause:#}");
            return Disposition::Fatal(
                failure(Some(position), "mapper", FailureKind::Mapping, reason),
                PipelineError::Mapping { position, cause },
            );
        }
    };

    for slot in processors.iter_mut() {
        match slot.stage.process(item) {
            Outcome::Continue(next) => item = next,
            Outcome::StopChain => {
                debug!(position, stage = slot.stage.name(), "chain stopped");
                return Disposition::Processed;
            }
            Outcome::Fail(cause) => {
                let stage = slot.stage.name().to_string();
                let record_failure = failure(
                    Some(position),
                    &stage,
                    FailureKind::Processing,
                    format!("{cause:#}"),
                );
                return match slot.policy {
                    ErrorPolicy::Skip => Disposition::Failed(record_failure),
                    ErrorPolicy::Abort => Disposition::Fatal(
                        record_failure,
                        PipelineError::Processing {
                            stage,
                            position,
                            cause,
                        },
                    ),
                };
            }
        }
    }

    if let Some(slot) = sink.as_mut()
        && let Err(cause) = slot.stage.write(item)
    {
        let stage = slot.stage.name().to_string();
        let record_failure = failure(Some(position), &stage, FailureKind::Sink, cause.to_string());
        return match slot.policy {
            ErrorPolicy::Skip => Disposition::Failed(record_failure),
            ErrorPolicy::Abort => Disposition::Fatal(
                record_failure,
                PipelineError::Sink {
                    stage,
                    position,
                    cause,
                },
            ),
        };
    }

    Disposition::Processed
}

fn flush<T>(
    processors: &mut Processors<'_, T>,
    sink: &mut Sink<'_, T>,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    for slot in processors.iter_mut() {
        if let Err(cause) = slot.stage.flush() {
            let stage = slot.stage.name().to_string();
            flush_failed(stage, cause, slot.policy, report)?;
        }
    }
    if let Some(slot) = sink.as_mut()
        && let Err(cause) = slot.stage.flush()
    {
        let stage = slot.stage.name().to_string();
        flush_failed(stage, cause.into(), slot.policy, report)?;
    }
    Ok(())
}

/// Lets the sink settle what it already accepted before the run aborts.
/// A failure here is recorded; the abort cause is unchanged.
fn abort_sink<T>(sink: &mut Sink<'_, T>, report: &mut PipelineReport) {
    if let Some(slot) = sink.as_mut()
        && let Err(cause) = slot.stage.abort()
    {
        let stage = slot.stage.name().to_string();
        let reason = cause.to_string();
        warn!(stage = %stage, reason = %reason, "sink abort failed");
        report.record_flush_failure(failure(None, &stage, FailureKind::Flush, reason));
    }
}

fn flush_failed(
    stage: String,
    cause: anyhow::Error,
    policy: ErrorPolicy,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    match policy {
        ErrorPolicy::Abort => Err(PipelineError::Flush { stage, cause }),
        ErrorPolicy::Skip => {
            let reason = format!("{cause:#}");
            warn!(stage = %stage, reason = %reason, "flush failed");
            report.record_flush_failure(failure(None, &stage, FailureKind::Flush, reason));
            Ok(())
        }
    }
}

fn failure(
    position: Option<u64>,
    stage: &str,
    kind: FailureKind,
    reason: impl Into<String>,
) -> RecordFailure {
    RecordFailure {
        position,
        stage: stage.to_string(),
        kind,
        reason: reason.into(),
    }
}
