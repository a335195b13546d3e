//! Stage traits: filters, mappers, processors and sinks.
//!
//! Filters and mappers see the raw record by reference. Processors and
//! sinks take the mapped domain object by value and either hand it on,
//! stop the chain, or fail.

use std::ops::RangeInclusive;

use crate::error::{MapFailure, MappingError, SinkError};
use crate::record::RawRecord;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Predicate deciding whether a raw record advances to the mapper.
///
/// An error counts as a rejection; it is never fatal.
pub trait RecordFilter<P> {
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool>;

    fn name(&self) -> &str {
        "filter"
    }
}

impl<P, F: RecordFilter<P> + ?Sized> RecordFilter<P> for &F {
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool> {
        (**self).accepts(record)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Rejects the first record of the run (a header row).
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderFilter;

impl<P> RecordFilter<P> for HeaderFilter {
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool> {
        Ok(record.position() != 1)
    }

    fn name(&self) -> &str {
        "header"
    }
}

/// Rejects records whose payload is empty or whitespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankFilter;

impl<P: AsRef<str>> RecordFilter<P> for BlankFilter {
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool> {
        Ok(!record.payload().as_ref().trim().is_empty())
    }

    fn name(&self) -> &str {
        "blank"
    }
}

/// Keeps only records whose position lies in an inclusive range.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    range: RangeInclusive<u64>,
}

impl PositionFilter {
    pub fn new(range: RangeInclusive<u64>) -> Self {
        Self { range }
    }
}

impl<P> RecordFilter<P> for PositionFilter {
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool> {
        Ok(self.range.contains(&record.position()))
    }

    fn name(&self) -> &str {
        "position"
    }
}

/// Filter built from a plain predicate; see [`filter_fn`].
pub struct FilterFn<F> {
    f: F,
}

/// Wrap a closure as a [`RecordFilter`].
pub fn filter_fn<P, F>(f: F) -> FilterFn<F>
where
    F: Fn(&RawRecord<P>) -> bool,
{
    FilterFn { f }
}

impl<P, F> RecordFilter<P> for FilterFn<F>
where
    F: Fn(&RawRecord<P>) -> bool,
{
    fn accepts(&self, record: &RawRecord<P>) -> anyhow::Result<bool> {
        Ok((self.f)(record))
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Converts a raw record into a typed domain object.
pub trait RecordMapper<P, T> {
    fn map(&self, record: &RawRecord<P>) -> Result<T, MapFailure>;
}

impl<P, T, M: RecordMapper<P, T> + ?Sized> RecordMapper<P, T> for &M {
    fn map(&self, record: &RawRecord<P>) -> Result<T, MapFailure> {
        (**self).map(record)
    }
}

/// Mapper built from a closure; see [`map_fn`].
pub struct MapFn<F> {
    f: F,
}

/// Wrap a closure as a [`RecordMapper`]. Its errors are always per-record.
pub fn map_fn<P, T, F>(f: F) -> MapFn<F>
where
    F: Fn(&RawRecord<P>) -> Result<T, MappingError>,
{
    MapFn { f }
}

impl<P, T, F> RecordMapper<P, T> for MapFn<F>
where
    F: Fn(&RawRecord<P>) -> Result<T, MappingError>,
{
    fn map(&self, record: &RawRecord<P>) -> Result<T, MapFailure> {
        (self.f)(record).map_err(MapFailure::Invalid)
    }
}

/// Identity mapper for pipelines that work on the raw payload directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadMapper;

impl<P: Clone> RecordMapper<P, P> for PayloadMapper {
    fn map(&self, record: &RawRecord<P>) -> Result<P, MapFailure> {
        Ok(record.payload().clone())
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Result of a processor step.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Hand the (possibly transformed) object to the next stage.
    Continue(T),
    /// Record fully handled; skip the rest of the chain. Not a failure.
    StopChain,
    /// Processing failed for this record.
    Fail(anyhow::Error),
}

impl<T> Outcome<T> {
    pub fn fail(err: impl Into<anyhow::Error>) -> Self {
        Self::Fail(err.into())
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

impl<T, E: Into<anyhow::Error>> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(item) => Self::Continue(item),
            Err(err) => Self::Fail(err.into()),
        }
    }
}

/// Transformation or side-effecting stage applied to each mapped object.
pub trait RecordProcessor<T> {
    fn process(&mut self, item: T) -> Outcome<T>;

    /// Called once after the source is exhausted.
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

impl<T, R: RecordProcessor<T> + ?Sized> RecordProcessor<T> for &mut R {
    fn process(&mut self, item: T) -> Outcome<T> {
        (**self).process(item)
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        (**self).flush()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Processor built from a closure; see [`processor_fn`].
pub struct ProcessorFn<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named [`RecordProcessor`].
pub fn processor_fn<T, F>(name: impl Into<String>, f: F) -> ProcessorFn<F>
where
    F: FnMut(T) -> Outcome<T>,
{
    ProcessorFn {
        name: name.into(),
        f,
    }
}

impl<T, F> RecordProcessor<T> for ProcessorFn<F>
where
    F: FnMut(T) -> Outcome<T>,
{
    fn process(&mut self, item: T) -> Outcome<T> {
        (self.f)(item)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Re-offers a clone of the item to the inner processor until it stops
/// failing or `attempts` runs out.
pub struct Retry<R> {
    inner: R,
    attempts: u32,
}

impl<R> Retry<R> {
    /// `attempts` counts the first try; values below 1 are treated as 1.
    pub fn new(inner: R, attempts: u32) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
        }
    }
}

impl<T: Clone, R: RecordProcessor<T>> RecordProcessor<T> for Retry<R> {
    fn process(&mut self, item: T) -> Outcome<T> {
        let mut attempt = 1;
        loop {
            match self.inner.process(item.clone()) {
                Outcome::Fail(err) if attempt < self.attempts => {
                    tracing::debug!(
                        stage = self.inner.name(),
                        attempt,
                        error = %format!("{err:#}"),
                        "retrying"
                    );
                    attempt += 1;
                }
                Outcome::Fail(err) => {
                    return Outcome::Fail(err.context(format!("gave up after {attempt} attempts")));
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.inner.flush()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Terminal stage persisting or forwarding the final object.
pub trait RecordSink<T> {
    fn write(&mut self, item: T) -> Result<(), SinkError>;

    /// Called once after the source is exhausted; commit pending work here.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called once when the run aborts, also after a failed `flush`. Items
    /// this sink already accepted were counted as processed; persist them here.
    fn abort(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

impl<T, S: RecordSink<T> + ?Sized> RecordSink<T> for &mut S {
    fn write(&mut self, item: T) -> Result<(), SinkError> {
        (**self).write(item)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn abort(&mut self) -> Result<(), SinkError> {
        (**self).abort()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Sink collecting every object in memory.
#[derive(Debug)]
pub struct CollectSink<T> {
    items: Vec<T>,
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> CollectSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> RecordSink<T> for CollectSink<T> {
    fn write(&mut self, item: T) -> Result<(), SinkError> {
        self.items.push(item);
        Ok(())
    }

    fn name(&self) -> &str {
        "collect"
    }
}

/// What the runner does when a stage fails on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Count the record as failed and move on.
    #[default]
    Skip,
    /// Abort the whole run.
    Abort,
}
