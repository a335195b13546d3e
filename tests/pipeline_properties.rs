//! End-to-end behavior of the runner over in-memory sources.

use std::cell::Cell;

use batchpipe::{
    ErrorPolicy, HeaderFilter, IterSource, MappingError, Outcome, Pipeline, PipelineError,
    RawRecord, RecordSink, RecordSource, RunState, SinkError, filter_fn, map_fn, processor_fn,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Tweet {
    id: String,
    user: String,
    message: String,
}

fn parse_tweet(r: &RawRecord<String>) -> Result<Tweet, MappingError> {
    let mut fields = r.as_str().splitn(3, ',');
    let mut next = |name: &str| {
        fields
            .next()
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MappingError::new(r.position(), format!("missing field '{name}'")))
    };
    Ok(Tweet {
        id: next("id")?,
        user: next("user")?,
        message: next("message")?,
    })
}

/// Sink that only counts writes.
#[derive(Default)]
struct CountingSink {
    written: u64,
}

impl<T> RecordSink<T> for CountingSink {
    fn write(&mut self, _item: T) -> Result<(), SinkError> {
        self.written += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Wraps a source and counts `close()` calls.
struct Closing<'c, S> {
    inner: S,
    closes: &'c Cell<u32>,
}

impl<S: RecordSource> RecordSource for Closing<'_, S> {
    type Payload = S::Payload;

    fn open(&mut self) -> anyhow::Result<()> {
        self.inner.open()
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<S::Payload>>> {
        self.inner.next()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closes.set(self.closes.get() + 1);
        self.inner.close()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

fn source_of(lines: &[&str]) -> IterSource<std::vec::IntoIter<String>> {
    IterSource::new(lines.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

#[test]
fn test_header_then_two_tweets() {
    let mut source = source_of(&["header", "a,bob,hi", "b,carl,yo"]);
    let mut sink = CountingSink::default();

    let report = Pipeline::new(&mut source, map_fn(parse_tweet))
        .filter(HeaderFilter)
        .processor(processor_fn("noop", |t: Tweet| Outcome::Continue(t)))
        .sink(&mut sink)
        .run();

    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(report.read(), 3);
    assert_eq!(report.filtered(), 1);
    assert_eq!(report.processed(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(sink.written, 2);
}

#[test]
fn test_empty_source_completes_with_zero_counters() {
    let mut source = source_of(&[]);
    let report = Pipeline::new(&mut source, map_fn(parse_tweet))
        .sink(CountingSink::default())
        .run();
    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(
        (report.read(), report.filtered(), report.processed(), report.failed()),
        (0, 0, 0, 0)
    );
    assert!(report.cause().is_none());
}

#[test]
fn test_rejecting_filter_filters_everything() {
    let mut source = source_of(&["a,b,c", "d,e,f", "g,h,i"]);
    let report = Pipeline::new(&mut source, map_fn(parse_tweet))
        .filter(filter_fn(|_: &RawRecord<String>| false))
        .sink(CountingSink::default())
        .run();
    assert_eq!(report.processed(), 0);
    assert_eq!(report.filtered(), report.read());
    assert_eq!(report.read(), 3);
}

#[test]
fn test_failing_mapper_still_completes() {
    let mut source = source_of(&["only-id", "", "x,"]);
    let report = Pipeline::new(&mut source, map_fn(parse_tweet))
        .sink(CountingSink::default())
        .run();
    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(report.failed(), report.read());
    assert_eq!(report.processed(), 0);
    assert_eq!(report.failures()[0].reason, "missing field 'user'");
}

#[test]
fn test_fatal_processor_on_record_n() {
    let closes = Cell::new(0);
    let mut source = Closing {
        inner: source_of(&["1,a,m", "2,b,m", "3,c,m", "4,d,m", "5,e,m"]),
        closes: &closes,
    };

    let report = Pipeline::new(&mut source, map_fn(parse_tweet))
        .processor_with(
            processor_fn("indexer", |t: Tweet| {
                if t.id == "4" {
                    Outcome::fail(anyhow::anyhow!("index unavailable"))
                } else {
                    Outcome::Continue(t)
                }
            }),
            ErrorPolicy::Abort,
        )
        .sink(CountingSink::default())
        .run();

    assert_eq!(report.state(), RunState::Aborted);
    assert_eq!(report.processed(), 3);
    assert_eq!(closes.get(), 1);
    assert!(report.is_consistent());
    let err = report.into_result().unwrap_err();
    assert!(matches!(err, PipelineError::Processing { position: 4, .. }));
}

#[test]
fn test_completed_run_closes_source_once() {
    let closes = Cell::new(0);
    let mut source = Closing {
        inner: source_of(&["1,a,m"]),
        closes: &closes,
    };
    let report = Pipeline::new(&mut source, map_fn(parse_tweet)).run();
    assert!(report.is_completed());
    assert_eq!(closes.get(), 1);
}

/// What the generated stage should do with a record.
#[derive(Debug, Clone, Copy)]
enum Fate {
    Reject,
    BadMapping,
    FailProcessing,
    Stop,
    Pass,
}

fn fate() -> impl Strategy<Value = Fate> {
    prop_oneof![
        Just(Fate::Reject),
        Just(Fate::BadMapping),
        Just(Fate::FailProcessing),
        Just(Fate::Stop),
        Just(Fate::Pass),
    ]
}

proptest! {
    #[test]
    fn test_counters_always_add_up(fates in proptest::collection::vec(fate(), 0..64), abort in any::<bool>()) {
        let mut source = IterSource::new(fates.clone());
        let policy = if abort { ErrorPolicy::Abort } else { ErrorPolicy::Skip };

        let report = Pipeline::new(
            &mut source,
            map_fn(|r: &RawRecord<Fate>| match r.payload() {
                Fate::BadMapping => Err(MappingError::new(r.position(), "bad")),
                f => Ok(*f),
            }),
        )
        .filter(filter_fn(|r: &RawRecord<Fate>| !matches!(r.payload(), Fate::Reject)))
        .processor_with(
            processor_fn("decide", |f: Fate| match f {
                Fate::FailProcessing => Outcome::fail(anyhow::anyhow!("no")),
                Fate::Stop => Outcome::StopChain,
                other => Outcome::Continue(other),
            }),
            policy,
        )
        .sink(CountingSink::default())
        .run();

        prop_assert!(report.is_consistent());
        prop_assert!(report.state().is_terminal());
        prop_assert_eq!(report.state() == RunState::Aborted, report.cause().is_some());

        let first_fatal = fates.iter().position(|f| matches!(f, Fate::FailProcessing));
        match (abort, first_fatal) {
            (true, Some(idx)) => {
                prop_assert_eq!(report.state(), RunState::Aborted);
                prop_assert_eq!(report.read(), idx as u64 + 1);
            }
            _ => {
                prop_assert_eq!(report.state(), RunState::Completed);
                prop_assert_eq!(report.read(), fates.len() as u64);
            }
        }
    }
}
