//! Pipeline builder.
//!
//! A `Pipeline` borrows a source and owns (or borrows, through the `&`/`&mut`
//! forwarding impls) its stages for exactly one run:
//!
//! ```
//! use batchpipe::{CollectSink, HeaderFilter, IterSource, Pipeline, RunState, map_fn};
//! use batchpipe::{MappingError, RawRecord};
//!
//! let lines = ["id", "1", "2", "x"].map(String::from);
//! let mut source = IterSource::new(lines);
//! let mut sink = CollectSink::new();
//!
//! let report = Pipeline::new(
//!     &mut source,
//!     map_fn(|r: &RawRecord<String>| {
//!         r.as_str()
//!             .parse::<u32>()
//!             .map_err(|e| MappingError::new(r.position(), e.to_string()))
//!     }),
//! )
//! .filter(HeaderFilter)
//! .sink(&mut sink)
//! .run();
//!
//! assert_eq!(report.state(), RunState::Completed);
//! assert_eq!((report.read(), report.filtered(), report.processed(), report.failed()), (4, 1, 2, 1));
//! assert_eq!(sink.items(), &[1, 2]);
//! ```

use crate::executor;
use crate::report::PipelineReport;
use crate::source::RecordSource;
use crate::stage::{ErrorPolicy, RecordFilter, RecordMapper, RecordProcessor, RecordSink};

/// A stage together with the policy applied when it fails.
pub(crate) struct Slot<S> {
    pub(crate) stage: S,
    pub(crate) policy: ErrorPolicy,
}

/// Source → filters → mapper → processors → sink, configured for one run.
pub struct Pipeline<'a, P, T> {
    pub(crate) name: String,
    pub(crate) source: &'a mut dyn RecordSource<Payload = P>,
    pub(crate) filters: Vec<Box<dyn RecordFilter<P> + 'a>>,
    pub(crate) mapper: Box<dyn RecordMapper<P, T> + 'a>,
    pub(crate) processors: Vec<Slot<Box<dyn RecordProcessor<T> + 'a>>>,
    pub(crate) sink: Option<Slot<Box<dyn RecordSink<T> + 'a>>>,
    pub(crate) limit: Option<u64>,
    default_policy: ErrorPolicy,
}

impl<'a, P, T> Pipeline<'a, P, T> {
    pub fn new<S, M>(source: &'a mut S, mapper: M) -> Self
    where
        S: RecordSource<Payload = P> + 'a,
        M: RecordMapper<P, T> + 'a,
    {
        Self {
            name: "pipeline".to_string(),
            source,
            filters: Vec::new(),
            mapper: Box::new(mapper),
            processors: Vec::new(),
            sink: None,
            limit: None,
            default_policy: ErrorPolicy::Skip,
        }
    }

    /// Name used in logs and in the report.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a filter. Filters run in the order they were added; the first
    /// rejection wins.
    pub fn filter(mut self, filter: impl RecordFilter<P> + 'a) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Append a processor using the current default policy.
    pub fn processor(self, processor: impl RecordProcessor<T> + 'a) -> Self {
        let policy = self.default_policy;
        self.processor_with(processor, policy)
    }

    /// Append a processor with an explicit failure policy.
    pub fn processor_with(
        mut self,
        processor: impl RecordProcessor<T> + 'a,
        policy: ErrorPolicy,
    ) -> Self {
        self.processors.push(Slot {
            stage: Box::new(processor),
            policy,
        });
        self
    }

    /// Set the terminal sink using the current default policy. A second call
    /// replaces the first sink.
    pub fn sink(self, sink: impl RecordSink<T> + 'a) -> Self {
        let policy = self.default_policy;
        self.sink_with(sink, policy)
    }

    pub fn sink_with(mut self, sink: impl RecordSink<T> + 'a, policy: ErrorPolicy) -> Self {
        self.sink = Some(Slot {
            stage: Box::new(sink),
            policy,
        });
        self
    }

    /// Stop after reading `n` raw records.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Stages added after this call abort the run on failure unless given
    /// an explicit policy.
    pub fn strict(mut self) -> Self {
        self.default_policy = ErrorPolicy::Abort;
        self
    }

    /// Execute the pipeline until the source is exhausted or a fatal error
    /// occurs. The source is closed before this returns.
    pub fn run(self) -> PipelineReport {
        executor::execute(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::IterSource;
    use crate::stage::{CollectSink, HeaderFilter, Outcome, PayloadMapper, processor_fn};

    #[test]
    fn test_builder_defaults() {
        let mut source = IterSource::new(Vec::<String>::new());
        let pipeline: Pipeline<'_, String, String> = Pipeline::new(&mut source, PayloadMapper);
        assert_eq!(pipeline.name, "pipeline");
        assert!(pipeline.filters.is_empty());
        assert!(pipeline.processors.is_empty());
        assert!(pipeline.sink.is_none());
        assert!(pipeline.limit.is_none());
    }

    #[test]
    fn test_strict_applies_to_later_stages() {
        let mut source = IterSource::new(vec!["a".to_string()]);
        let pipeline = Pipeline::new(&mut source, PayloadMapper)
            .processor(processor_fn("lenient", |s: String| Outcome::Continue(s)))
            .strict()
            .processor(processor_fn("strict", |s: String| Outcome::Continue(s)))
            .processor_with(
                processor_fn("override", |s: String| Outcome::Continue(s)),
                ErrorPolicy::Skip,
            )
            .sink(CollectSink::new());
        let policies: Vec<ErrorPolicy> = pipeline.processors.iter().map(|s| s.policy).collect();
        assert_eq!(
            policies,
            vec![ErrorPolicy::Skip, ErrorPolicy::Abort, ErrorPolicy::Skip]
        );
        assert_eq!(pipeline.sink.as_ref().map(|s| s.policy), Some(ErrorPolicy::Abort));
    }

    #[test]
    fn test_builder_collects_parts() {
        let mut source = IterSource::new(vec!["a".to_string()]);
        let pipeline: Pipeline<'_, String, String> = Pipeline::new(&mut source, PayloadMapper)
            .name("tweets")
            .filter(HeaderFilter)
            .limit(10);
        assert_eq!(pipeline.name, "tweets");
        assert_eq!(pipeline.filters.len(), 1);
        assert_eq!(pipeline.limit, Some(10));
    }
}
