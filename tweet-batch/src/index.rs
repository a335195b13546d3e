//! In-memory document index standing in for a search engine.
//!
//! Documents are JSON objects keyed by id. Writes land in a pending buffer
//! and only become searchable after [`SearchIndex::refresh`].

use std::collections::BTreeMap;
use std::fmt;

use batchpipe::{Outcome, RecordProcessor};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::tweet::Tweet;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index '{0}' is closed")]
    Closed(String),
    #[error("document {id} is not a JSON object")]
    NotAnObject { id: String },
    #[error("invalid query '{0}': expected '*' or 'field=value'")]
    InvalidQuery(String),
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    MatchAll,
    /// Documents whose `field` contains `value` as a whole token, ignoring case.
    Term { field: String, value: String },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Parse `*` or `field=value`.
    pub fn parse(text: &str) -> Result<Self, IndexError> {
        let text = text.trim();
        if text == "*" || text.is_empty() {
            return Ok(Self::MatchAll);
        }
        match text.split_once('=') {
            Some((field, value)) if !field.trim().is_empty() && !value.trim().is_empty() => {
                Ok(Self::term(field.trim(), value.trim()))
            }
            _ => Err(IndexError::InvalidQuery(text.to_string())),
        }
    }

    fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => {
                let Some(found) = doc.get(field) else {
                    return false;
                };
                let haystack = match found {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                haystack
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .any(|token| token.eq_ignore_ascii_case(value))
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => write!(f, "*"),
            Self::Term { field, value } => write!(f, "{field}={value}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug)]
pub struct SearchIndex {
    name: String,
    docs: BTreeMap<String, Value>,
    pending: Vec<(String, Value)>,
    closed: bool,
}

impl SearchIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: BTreeMap::new(),
            pending: Vec::new(),
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a document. It replaces any document with the same id once
    /// the index is refreshed.
    pub fn index(&mut self, id: impl Into<String>, doc: Value) -> Result<(), IndexError> {
        let id = id.into();
        if self.closed {
            return Err(IndexError::Closed(self.name.clone()));
        }
        if !doc.is_object() {
            return Err(IndexError::NotAnObject { id });
        }
        self.pending.push((id, doc));
        Ok(())
    }

    /// Make pending writes searchable. Returns how many were applied.
    pub fn refresh(&mut self) -> usize {
        let applied = self.pending.len();
        self.docs.extend(self.pending.drain(..));
        debug!(index = %self.name, applied, total = self.docs.len(), "refreshed");
        applied
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of searchable documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Reject further writes. Already refreshed documents stay searchable.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn search(&self, query: &Query) -> SearchHits {
        let hits: Vec<SearchHit> = self
            .docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, doc)| SearchHit {
                id: id.clone(),
                source: doc.clone(),
            })
            .collect();
        SearchHits {
            total: hits.len(),
            hits,
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Last stage of the indexing chain: writes the tweet and ends the chain.
pub struct TweetIndexer<'i> {
    index: &'i mut SearchIndex,
}

impl<'i> TweetIndexer<'i> {
    pub fn new(index: &'i mut SearchIndex) -> Self {
        Self { index }
    }
}

impl RecordProcessor<Tweet> for TweetIndexer<'_> {
    fn process(&mut self, tweet: Tweet) -> Outcome<Tweet> {
        let doc = match serde_json::to_value(&tweet) {
            Ok(doc) => doc,
            Err(e) => return Outcome::fail(e),
        };
        match self.index.index(tweet.id.to_string(), doc) {
            Ok(()) => Outcome::StopChain,
            Err(e) => Outcome::fail(e),
        }
    }

    fn name(&self) -> &str {
        "tweet-indexer"
    }
}
