//! Record sources.
//!
//! A source produces a lazy, finite sequence of raw records. The runner
//! calls `open()` once, pulls with `next()` until it returns `None`, and
//! calls `close()` exactly once after a successful open, whatever the
//! outcome of the run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::record::{RawRecord, Sequence};

/// Producer of raw records from a backing store.
pub trait RecordSource {
    type Payload;

    /// Acquire the backing resource (file handle, connection, cursor).
    fn open(&mut self) -> anyhow::Result<()>;

    /// Next record, or `None` at end of sequence. Exhausted sources keep
    /// returning `None`.
    fn next(&mut self) -> anyhow::Result<Option<RawRecord<Self::Payload>>>;

    /// Release whatever `open()` acquired.
    fn close(&mut self) -> anyhow::Result<()>;

    /// Display name used in logs and errors.
    fn name(&self) -> &str;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    type Payload = S::Payload;

    fn open(&mut self) -> anyhow::Result<()> {
        (**self).open()
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<Self::Payload>>> {
        (**self).next()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Source over any iterator of payloads.
pub struct IterSource<I: Iterator> {
    name: String,
    items: I,
    seq: Sequence,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            name: "iter".to_string(),
            items: items.into_iter(),
            seq: Sequence::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<I: Iterator> RecordSource for IterSource<I> {
    type Payload = I::Item;

    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<I::Item>>> {
        Ok(self.items.next().map(|item| self.seq.stamp(item)))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Line-oriented
// ---------------------------------------------------------------------------

/// One record per line of any buffered reader.
///
/// Blank lines are records too; drop them with a filter if unwanted.
/// Trailing `\r\n` / `\n` are stripped.
pub struct ReaderSource<R: BufRead> {
    name: String,
    reader: R,
    seq: Sequence,
    done: bool,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            seq: Sequence::new(),
            done: false,
        }
    }
}

impl<R: BufRead> RecordSource for ReaderSource<R> {
    type Payload = String;

    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<String>>> {
        if self.done {
            return Ok(None);
        }
        read_line(&mut self.reader, &mut self.seq, &mut self.done)
            .with_context(|| format!("reading {}", self.name))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.done = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One record per line of a flat file, opened lazily on `open()`.
pub struct LineSource {
    path: PathBuf,
    name: String,
    reader: Option<BufReader<File>>,
    seq: Sequence,
    done: bool,
}

impl LineSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            reader: None,
            seq: Sequence::new(),
            done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file handle is currently held.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl RecordSource for LineSource {
    type Payload = String;

    fn open(&mut self) -> anyhow::Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        self.reader = Some(BufReader::new(file));
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<Option<RawRecord<String>>> {
        if self.done {
            return Ok(None);
        }
        let reader = self
            .reader
            .as_mut()
            .with_context(|| format!("{} read before open", self.path.display()))?;
        read_line(reader, &mut self.seq, &mut self.done)
            .with_context(|| format!("reading {}", self.path.display()))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.reader = None;
        self.done = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invalid UTF-8 is replaced with U+FFFD so one bad line stays one record.
fn read_line<R: BufRead>(
    reader: &mut R,
    seq: &mut Sequence,
    done: &mut bool,
) -> anyhow::Result<Option<RawRecord<String>>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        *done = true;
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(&buf).into_owned();
    Ok(Some(seq.stamp(line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn drain<S: RecordSource>(source: &mut S) -> Vec<RawRecord<S::Payload>> {
        let mut out = Vec::new();
        while let Some(r) = source.next().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_iter_source_positions() {
        let mut source = IterSource::new(vec!["a", "b", "c"]);
        source.open().unwrap();
        let records = drain(&mut source);
        let positions: Vec<u64> = records.iter().map(|r| r.position()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(source.next().unwrap().is_none());
        source.close().unwrap();
    }

    #[test]
    fn test_iter_source_name() {
        let source = IterSource::new(Vec::<u8>::new()).named("tweets");
        assert_eq!(source.name(), "tweets");
    }

    #[test]
    fn test_reader_source_strips_line_endings() {
        let mut source = ReaderSource::new("stdin", Cursor::new("id,user\r\n1,bob\n\n2,carl"));
        source.open().unwrap();
        let lines: Vec<String> = drain(&mut source)
            .into_iter()
            .map(RawRecord::into_payload)
            .collect();
        assert_eq!(lines, vec!["id,user", "1,bob", "", "2,carl"]);
    }

    #[test]
    fn test_reader_source_keeps_invalid_utf8_line() {
        let input = b"ok\n\xff\xfe,bob\r\nnext\n".to_vec();
        let mut source = ReaderSource::new("bytes", Cursor::new(input));
        source.open().unwrap();
        let records = drain(&mut source);

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].position(), 2);
        assert_eq!(records[1].payload(), "\u{FFFD}\u{FFFD},bob");
        assert_eq!(records[2].payload(), "next");
    }

    #[test]
    fn test_reader_source_stays_exhausted() {
        let mut source = ReaderSource::new("empty", Cursor::new(""));
        source.open().unwrap();
        assert!(source.next().unwrap().is_none());
        assert!(source.next().unwrap().is_none());
    }

    #[test]
    fn test_line_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,user,message").unwrap();
        writeln!(file, "1,foo,hello").unwrap();
        let mut source = LineSource::new(file.path());
        assert!(!source.is_open());
        source.open().unwrap();
        assert!(source.is_open());
        let records = drain(&mut source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].as_str(), "1,foo,hello");
        assert_eq!(records[1].position(), 2);
        source.close().unwrap();
        assert!(!source.is_open());
    }

    #[test]
    fn test_line_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = LineSource::new(dir.path().join("nope.csv"));
        let err = source.open().unwrap_err();
        assert!(err.to_string().contains("nope.csv"));
    }

    #[test]
    fn test_line_source_next_before_open() {
        let mut source = LineSource::new("tweets.csv");
        assert!(source.next().is_err());
    }
}
