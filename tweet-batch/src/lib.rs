//! # tweet-batch
//!
//! Two batch jobs built on [`batchpipe`]:
//!
//! - **load-csv**: a delimited tweet file is filtered, mapped, normalized and
//!   inserted into the SQLite `tweet` table, which is then dumped.
//! - **index**: the `tweet` table is read page by page, normalized and
//!   indexed into an in-memory [`SearchIndex`], which is then searched.
//!
//! Both read their settings from [`Config`], usually loaded from TOML and
//! overridden from the command line.

pub mod config;
pub mod database;
pub mod index;
pub mod launcher;
pub mod logging;
pub mod tweet;

pub use config::{Config, ConfigError};
pub use database::{Row, TableSource, TableWriter, TweetDatabase};
pub use index::{IndexError, Query, SearchHit, SearchHits, SearchIndex, TweetIndexer};
pub use launcher::{IndexOutcome, LoadOutcome, index_table, load_csv, open_database};
pub use tweet::{DelimitedTweetMapper, RowTweetMapper, Tweet, TweetTransformer};
