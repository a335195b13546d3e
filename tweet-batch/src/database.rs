//! SQLite side of the launchers: the tweet table, a paged row source and a
//! batching insert sink.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Context;
use batchpipe::{RawRecord, RecordSink, RecordSource, Sequence, SinkError};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::tweet::Tweet;

/// Tweets inserted by [`TweetDatabase::populate`].
pub const SAMPLE_TWEETS: [(i64, &str, &str); 3] = [
    (1, "foo", "batch jobs rock! #rust"),
    (2, "bar", "@foo I do confirm :-)"),
    (3, "baz", "@foo @bar  indexing   tweets from a table"),
];

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS tweet (
        id INTEGER PRIMARY KEY,
        user TEXT NOT NULL,
        message TEXT NOT NULL
    );
"#;

const INSERT_TWEET: &str = "INSERT INTO tweet (id, user, message) VALUES (?1, ?2, ?3)";
const UPSERT_TWEET: &str = "INSERT OR REPLACE INTO tweet (id, user, message) VALUES (?1, ?2, ?3)";

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// One result row: column names paired with their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of the named column, if the row has one.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Connection to a database holding the `tweet` table.
///
/// A database created with [`TweetDatabase::temporary`] lives in a scratch
/// directory that is removed when the value is dropped.
pub struct TweetDatabase {
    conn: Connection,
    path: Option<PathBuf>,
    _scratch: Option<TempDir>,
}

impl TweetDatabase {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::init(conn, Some(path.to_path_buf()), None)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::init(conn, None, None)
    }

    pub fn temporary() -> anyhow::Result<Self> {
        let scratch = TempDir::new().context("creating database directory")?;
        let path = scratch.path().join("tweets.db");
        let conn = Connection::open(&path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::init(conn, Some(path), Some(scratch))
    }

    fn init(
        conn: Connection,
        path: Option<PathBuf>,
        scratch: Option<TempDir>,
    ) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("creating tweet table")?;
        debug!(path = ?path, "database ready");
        Ok(Self {
            conn,
            path,
            _scratch: scratch,
        })
    }

    /// File backing the database; `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert the sample tweets, replacing rows with the same ids.
    pub fn populate(&self) -> anyhow::Result<()> {
        let mut stmt = self.conn.prepare_cached(UPSERT_TWEET)?;
        for (id, user, message) in SAMPLE_TWEETS {
            stmt.execute(params![id, user, message])
                .with_context(|| format!("inserting sample tweet {id}"))?;
        }
        Ok(())
    }

    /// Every tweet in the table, ordered by id.
    pub fn dump(&self) -> anyhow::Result<Vec<Tweet>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, user, message FROM tweet ORDER BY id")?;
        let tweets = stmt
            .query_map([], |row| {
                Ok(Tweet {
                    id: row.get("id")?,
                    user: row.get("user")?,
                    message: row.get("message")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tweets)
    }

    pub fn count(&self) -> anyhow::Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tweet", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Rows of an arbitrary `SELECT`, fetched `fetch_size` at a time.
///
/// The query is wrapped in `LIMIT`/`OFFSET` paging, so it must not carry a
/// `LIMIT` of its own. A trailing `;` is ignored.
pub struct TableSource<'c> {
    conn: &'c Connection,
    query: String,
    fetch_size: usize,
    offset: usize,
    buffer: VecDeque<Row>,
    seq: Sequence,
    opened: bool,
    exhausted: bool,
}

impl<'c> TableSource<'c> {
    pub fn new(conn: &'c Connection, query: impl Into<String>) -> Self {
        Self {
            conn,
            query: query.into().trim_end().trim_end_matches(';').trim_end().to_string(),
            fetch_size: 100,
            offset: 0,
            buffer: VecDeque::new(),
            seq: Sequence::new(),
            opened: false,
            exhausted: false,
        }
    }

    /// Rows fetched per round trip. Zero is treated as one.
    pub fn fetch_size(mut self, n: usize) -> Self {
        self.fetch_size = n.max(1);
        self
    }

    fn paged_query(&self) -> String {
        format!("SELECT * FROM ({}) LIMIT ?1 OFFSET ?2", self.query)
    }

    fn fetch_page(&mut self) -> anyhow::Result<()> {
        let conn = self.conn;
        let sql = self.paged_query();
        let mut stmt = conn.prepare_cached(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params![self.fetch_size as i64, self.offset as i64])?;
        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.buffer.push_back(Row::new(columns.clone(), values));
            fetched += 1;
        }

        debug!(offset = self.offset, fetched, "fetched page");
        self.offset += fetched;
        if fetched < self.fetch_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl RecordSource for TableSource<'_> {
    type Payload = Row;

    fn open(&mut self) -> anyhow::Result<()> {
        // Preparing surfaces a missing table or bad SQL before any row is read.
        self.conn
            .prepare_cached(&self.paged_query())
            .with_context(|| format!("preparing query '{}'", self.query))?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<Row>>> {
        anyhow::ensure!(self.opened, "table source is not open");
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page()
                .with_context(|| format!("fetching rows at offset {}", self.offset))?;
        }
        Ok(self.buffer.pop_front().map(|row| self.seq.stamp(row)))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.buffer.clear();
        self.opened = false;
        self.exhausted = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.query
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

type Binder<'c, T> = Box<dyn Fn(&T) -> Vec<Value> + 'c>;

/// Inserts each item with a prepared statement, committing every
/// `commit_interval` writes. The last partial batch is committed on flush,
/// and also when the run aborts, so every accepted row is durable. A batch
/// still open when the writer is dropped outside a run is rolled back.
pub struct TableWriter<'c, T> {
    conn: &'c Connection,
    sql: String,
    binder: Binder<'c, T>,
    commit_interval: usize,
    pending: usize,
    in_transaction: bool,
    written: u64,
}

impl<'c, T> TableWriter<'c, T> {
    pub fn new(
        conn: &'c Connection,
        sql: impl Into<String>,
        binder: impl Fn(&T) -> Vec<Value> + 'c,
    ) -> Self {
        Self {
            conn,
            sql: sql.into(),
            binder: Box::new(binder),
            commit_interval: 1,
            pending: 0,
            in_transaction: false,
            written: 0,
        }
    }

    /// Writes per transaction. Zero is treated as one.
    pub fn commit_interval(mut self, n: usize) -> Self {
        self.commit_interval = n.max(1);
        self
    }

    /// Rows inserted so far, committed or not.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        if !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .context("starting transaction")
                .map_err(SinkError::unavailable)?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .context("committing transaction")
                .map_err(SinkError::unavailable)?;
            debug!(rows = self.pending, "committed batch");
            self.in_transaction = false;
            self.pending = 0;
        }
        Ok(())
    }
}

impl<'c> TableWriter<'c, Tweet> {
    /// Writer for the `tweet` table.
    pub fn tweets(conn: &'c Connection) -> Self {
        Self::new(conn, INSERT_TWEET, |t: &Tweet| {
            vec![
                Value::Integer(t.id),
                Value::Text(t.user.clone()),
                Value::Text(t.message.clone()),
            ]
        })
    }
}

impl<T> RecordSink<T> for TableWriter<'_, T> {
    fn write(&mut self, item: T) -> Result<(), SinkError> {
        self.begin()?;
        let values = (self.binder)(&item);
        self.conn
            .prepare_cached(&self.sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(values)))
            .map_err(SinkError::write)?;
        self.written += 1;
        self.pending += 1;
        if self.pending >= self.commit_interval {
            self.commit()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.commit()
    }

    fn abort(&mut self) -> Result<(), SinkError> {
        self.commit()
    }

    fn name(&self) -> &str {
        "table-writer"
    }
}

impl<T> Drop for TableWriter<'_, T> {
    fn drop(&mut self) {
        if self.in_transaction {
            warn!(rows = self.pending, "rolling back uncommitted batch");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}
