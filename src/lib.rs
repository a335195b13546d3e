//! # batchpipe
//!
//! A small record-at-a-time batch pipeline engine.
//!
//! ## Overview
//!
//! A run pulls raw records from a source one at a time and pushes each one
//! through a fixed chain before reading the next:
//! - **Source**: produces positioned raw records (file lines, table rows)
//! - **Filters**: drop records that should not advance (header rows)
//! - **Mapper**: turns a raw record into a typed domain object
//! - **Processors**: transform or act on the object, in declared order
//! - **Sink**: persists or forwards the final object
//!
//! The runner counts every record into exactly one of filtered, processed
//! or failed and returns a [`PipelineReport`]. Per-record failures are
//! counted and skipped; stages registered with [`ErrorPolicy::Abort`] end
//! the run instead. The source is closed on every exit path.
//!
//! ## Example
//!
//! ```
//! use batchpipe::{
//!     CollectSink, HeaderFilter, IterSource, MappingError, Outcome, Pipeline, RawRecord,
//!     map_fn, processor_fn,
//! };
//!
//! let rows = ["id,user", "1,bob", "2,carl"].map(String::from);
//! let mut source = IterSource::new(rows);
//! let mut users = CollectSink::new();
//!
//! let report = Pipeline::new(
//!     &mut source,
//!     map_fn(|r: &RawRecord<String>| {
//!         r.as_str()
//!             .split(',')
//!             .nth(1)
//!             .map(str::to_string)
//!             .ok_or_else(|| MappingError::new(r.position(), "missing user"))
//!     }),
//! )
//! .name("users")
//! .filter(HeaderFilter)
//! .processor(processor_fn("upper", |u: String| Outcome::Continue(u.to_uppercase())))
//! .sink(&mut users)
//! .run();
//!
//! assert!(report.is_completed());
//! assert_eq!(users.items(), &["BOB".to_string(), "CARL".to_string()]);
//! ```

pub mod error;
mod executor;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod source;
pub mod stage;

pub use error::{MapFailure, MappingError, PipelineError, SinkError};
pub use pipeline::Pipeline;
pub use record::{RawRecord, Sequence};
pub use report::{FailureKind, MAX_RECORDED_FAILURES, PipelineReport, RecordFailure, RunState};
pub use source::{IterSource, LineSource, ReaderSource, RecordSource};
pub use stage::{
    BlankFilter, CollectSink, ErrorPolicy, FilterFn, HeaderFilter, MapFn, Outcome, PayloadMapper,
    PositionFilter, ProcessorFn, RecordFilter, RecordMapper, RecordProcessor, RecordSink, Retry,
    filter_fn, map_fn, processor_fn,
};
