//! The two tutorial jobs: load a delimited file into the tweet table, and
//! index the tweet table into a search index.

use batchpipe::{BlankFilter, HeaderFilter, LineSource, Pipeline, PipelineReport};
use tracing::info;

use crate::config::Config;
use crate::database::{TableSource, TableWriter, TweetDatabase};
use crate::index::{Query, SearchHits, SearchIndex, TweetIndexer};
use crate::tweet::{DelimitedTweetMapper, RowTweetMapper, Tweet, TweetTransformer};

/// Query the indexing job reads tweets with.
pub const TWEET_QUERY: &str = "SELECT id, user, message FROM tweet ORDER BY id";

/// Result of [`load_csv`]: the run report and the table contents afterwards.
#[derive(Debug)]
pub struct LoadOutcome {
    pub report: PipelineReport,
    pub rows: Vec<Tweet>,
}

/// Result of [`index_table`]: the run report and the hits for the query.
#[derive(Debug)]
pub struct IndexOutcome {
    pub report: PipelineReport,
    pub hits: SearchHits,
}

/// Open the configured database, or a temporary one when no path is set.
pub fn open_database(config: &Config) -> anyhow::Result<TweetDatabase> {
    match &config.database.path {
        Some(path) => TweetDatabase::open(path),
        None => TweetDatabase::temporary(),
    }
}

/// File → header filter → delimited mapper → transformer → table writer,
/// then dump the table.
///
/// Errors only for setup problems; an aborted run is reported through
/// `LoadOutcome::report`.
pub fn load_csv(config: &Config, db: &TweetDatabase) -> anyhow::Result<LoadOutcome> {
    let delimiter = config.csv.delimiter_byte()?;
    let mapper = DelimitedTweetMapper::new(delimiter, config.csv.fields.as_slice())?;
    let writer =
        TableWriter::tweets(db.connection()).commit_interval(config.pipeline.commit_interval);
    let mut source = LineSource::new(&config.csv.path);

    let mut pipeline = Pipeline::new(&mut source, mapper).name("load-csv");
    if config.csv.header {
        pipeline = pipeline.filter(HeaderFilter);
    }
    pipeline = pipeline.filter(BlankFilter);
    if let Some(n) = config.pipeline.limit {
        pipeline = pipeline.limit(n);
    }
    if config.pipeline.strict {
        pipeline = pipeline.strict();
    }
    let report = pipeline.processor(TweetTransformer).sink(writer).run();

    let rows = db.dump()?;
    info!(rows = rows.len(), "tweet table dumped");
    Ok(LoadOutcome { report, rows })
}

/// Populate the table → table source → row mapper → transformer → indexer,
/// then refresh the index and run `query`.
pub fn index_table(
    config: &Config,
    db: &TweetDatabase,
    index: &mut SearchIndex,
    query: &Query,
) -> anyhow::Result<IndexOutcome> {
    db.populate()?;
    let mut source =
        TableSource::new(db.connection(), TWEET_QUERY).fetch_size(config.pipeline.fetch_size);

    let mut pipeline = Pipeline::new(&mut source, RowTweetMapper::default()).name("index-table");
    if let Some(n) = config.pipeline.limit {
        pipeline = pipeline.limit(n);
    }
    if config.pipeline.strict {
        pipeline = pipeline.strict();
    }
    let report = pipeline
        .processor(TweetTransformer)
        .processor(TweetIndexer::new(index))
        .run();

    let applied = index.refresh();
    let hits = index.search(query);
    info!(index = %index.name(), applied, query = %query, total = hits.total, "index searched");
    Ok(IndexOutcome { report, hits })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use batchpipe::RunState;

    use super::*;

    fn csv_config(lines: &[&str]) -> (Config, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        let mut config = Config::default();
        config.csv.path = file.path().to_path_buf();
        (config, file)
    }

    #[test]
    fn test_load_csv_skips_header_and_bad_rows() {
        let (config, _file) =
            csv_config(&["id,user,message", "1,foo,hi", "2,bar,", "", "3,baz,  a   b "]);
        let db = TweetDatabase::in_memory().unwrap();
        let outcome = load_csv(&config, &db).unwrap();

        let report = &outcome.report;
        assert_eq!(report.state(), RunState::Completed);
        assert_eq!(
            (report.read(), report.filtered(), report.processed(), report.failed()),
            (5, 2, 2, 1)
        );
        assert_eq!(
            outcome.rows,
            vec![Tweet::new(1, "foo", "hi"), Tweet::new(3, "baz", "a b")]
        );
    }

    #[test]
    fn test_load_csv_strict_aborts_on_transformer_failure() {
        let (mut config, _file) =
            csv_config(&["id,user,message", "1,foo,hi", "2,bar,   ", "3,baz,yo"]);
        config.pipeline.strict = true;
        let db = TweetDatabase::in_memory().unwrap();
        let outcome = load_csv(&config, &db).unwrap();

        assert_eq!(outcome.report.state(), RunState::Aborted);
        assert_eq!(outcome.report.processed(), 1);
        assert_eq!(outcome.rows, vec![Tweet::new(1, "foo", "hi")]);
    }

    #[test]
    fn test_load_csv_strict_abort_keeps_accepted_rows() {
        let (mut config, _file) = csv_config(&[
            "id,user,message",
            "1,foo,hi",
            "2,bar,yo",
            "3,baz,   ",
            "4,qux,ok",
        ]);
        config.pipeline.strict = true;
        config.pipeline.commit_interval = 10;
        let db = TweetDatabase::in_memory().unwrap();
        let outcome = load_csv(&config, &db).unwrap();

        assert_eq!(outcome.report.state(), RunState::Aborted);
        assert_eq!(outcome.report.processed(), 2);
        assert_eq!(outcome.rows.len() as u64, outcome.report.processed());
    }

    #[test]
    fn test_load_csv_missing_file_aborts() {
        let mut config = Config::default();
        config.csv.path = "/nonexistent/tweets.csv".into();
        let db = TweetDatabase::in_memory().unwrap();
        let outcome = load_csv(&config, &db).unwrap();
        assert_eq!(outcome.report.state(), RunState::Aborted);
        assert_eq!(outcome.report.read(), 0);
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn test_load_csv_limit() {
        let (mut config, _file) =
            csv_config(&["id,user,message", "1,foo,hi", "2,bar,yo", "3,baz,ok"]);
        config.pipeline.limit = Some(2);
        let db = TweetDatabase::in_memory().unwrap();
        let outcome = load_csv(&config, &db).unwrap();
        assert!(outcome.report.is_completed());
        assert_eq!(outcome.rows.len(), 1);
    }

    #[test]
    fn test_index_table_match_all() {
        let config = Config::default();
        let db = TweetDatabase::in_memory().unwrap();
        let mut index = SearchIndex::new("tweets");
        let outcome = index_table(&config, &db, &mut index, &Query::MatchAll).unwrap();

        assert!(outcome.report.is_completed());
        assert_eq!(outcome.report.read(), 3);
        assert_eq!(outcome.report.processed(), 3);
        assert_eq!(outcome.hits.total, 3);
        assert_eq!(
            outcome.hits.hits[2].source["message"],
            "@foo @bar indexing tweets from a table"
        );
    }

    #[test]
    fn test_index_table_term_query() {
        let mut config = Config::default();
        config.pipeline.fetch_size = 1;
        let db = TweetDatabase::in_memory().unwrap();
        let mut index = SearchIndex::new("tweets");
        let query = Query::term("message", "@FOO");
        let outcome = index_table(&config, &db, &mut index, &query).unwrap();
        assert_eq!(outcome.hits.total, 2);
    }

    #[test]
    fn test_index_table_closed_index_fails_records() {
        let config = Config::default();
        let db = TweetDatabase::in_memory().unwrap();
        let mut index = SearchIndex::new("tweets");
        index.close();
        let outcome = index_table(&config, &db, &mut index, &Query::MatchAll).unwrap();
        assert!(outcome.report.is_completed());
        assert_eq!(outcome.report.failed(), 3);
        assert_eq!(outcome.hits.total, 0);
    }
}
