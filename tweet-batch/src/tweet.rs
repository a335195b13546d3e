//! Tweet domain object, its mappers and the transformer stage.

use batchpipe::{MapFailure, MappingError, Outcome, RawRecord, RecordMapper, RecordProcessor};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::database::Row;

/// Field names a tweet is built from.
pub const TWEET_FIELDS: [&str; 3] = ["id", "user", "message"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub user: String,
    pub message: String,
}

impl Tweet {
    pub fn new(id: i64, user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            user: user.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// Maps one delimited line (`1,foo,hello`) onto a [`Tweet`].
///
/// `fields` names the column at each position; columns not named
/// `id`, `user` or `message` are ignored. A line with more or fewer fields
/// than that list is invalid. Quoted fields follow CSV rules.
#[derive(Debug, Clone)]
pub struct DelimitedTweetMapper {
    delimiter: u8,
    width: usize,
    id: usize,
    user: usize,
    message: usize,
}

impl DelimitedTweetMapper {
    /// Fails if any of `id`, `user`, `message` is missing from `fields`.
    pub fn new<S: AsRef<str>>(delimiter: u8, fields: &[S]) -> anyhow::Result<Self> {
        let index_of = |name: &str| {
            fields
                .iter()
                .position(|f| f.as_ref() == name)
                .ok_or_else(|| anyhow::anyhow!("field list has no '{name}' column"))
        };
        Ok(Self {
            delimiter,
            width: fields.len(),
            id: index_of("id")?,
            user: index_of("user")?,
            message: index_of("message")?,
        })
    }
}

impl Default for DelimitedTweetMapper {
    fn default() -> Self {
        Self {
            delimiter: b',',
            width: 3,
            id: 0,
            user: 1,
            message: 2,
        }
    }
}

impl RecordMapper<String, Tweet> for DelimitedTweetMapper {
    fn map(&self, record: &RawRecord<String>) -> Result<Tweet, MapFailure> {
        let position = record.position();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(record.as_str().as_bytes());

        let mut fields = csv::StringRecord::new();
        let found = reader
            .read_record(&mut fields)
            .map_err(|e| MappingError::new(position, format!("malformed line: {e}")))?;
        if !found {
            return Err(MappingError::new(position, "empty line").into());
        }
        if fields.len() != self.width {
            return Err(MappingError::new(
                position,
                format!("expected {} fields, found {}", self.width, fields.len()),
            )
            .into());
        }

        let field = |index: usize, name: &str| -> Result<String, MappingError> {
            match fields.get(index) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(MappingError::new(position, format!("missing field '{name}'"))),
            }
        };

        let id_text = field(self.id, "id")?;
        let id = id_text.trim().parse::<i64>().map_err(|_| {
            MappingError::new(position, format!("field 'id' is not an integer: '{id_text}'"))
        })?;

        Ok(Tweet {
            id,
            user: field(self.user, "user")?,
            message: field(self.message, "message")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Table rows
// ---------------------------------------------------------------------------

/// Maps a table [`Row`] onto a [`Tweet`] by column name.
#[derive(Debug, Clone)]
pub struct RowTweetMapper {
    id: String,
    user: String,
    message: String,
}

impl RowTweetMapper {
    pub fn new(id: impl Into<String>, user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            message: message.into(),
        }
    }
}

impl Default for RowTweetMapper {
    fn default() -> Self {
        Self::new("id", "user", "message")
    }
}

impl RecordMapper<Row, Tweet> for RowTweetMapper {
    fn map(&self, record: &RawRecord<Row>) -> Result<Tweet, MapFailure> {
        let position = record.position();
        let row = record.payload();
        let column = |name: &str| {
            row.get(name)
                .ok_or_else(|| MappingError::new(position, format!("missing column '{name}'")))
        };
        let text = |name: &str| -> Result<String, MappingError> {
            match column(name)? {
                Value::Text(s) => Ok(s.clone()),
                Value::Null => Err(MappingError::new(position, format!("column '{name}' is null"))),
                other => Err(MappingError::new(
                    position,
                    format!("column '{name}' is not text: {other:?}"),
                )),
            }
        };

        let id = match column(&self.id)? {
            Value::Integer(id) => *id,
            Value::Text(s) => s.trim().parse().map_err(|_| {
                MappingError::new(position, format!("column '{}' is not an integer: '{s}'", self.id))
            })?,
            other => {
                return Err(MappingError::new(
                    position,
                    format!("column '{}' is not an integer: {other:?}", self.id),
                )
                .into());
            }
        };

        Ok(Tweet {
            id,
            user: text(&self.user)?,
            message: text(&self.message)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

/// Normalizes whitespace in user and message; rejects blank messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TweetTransformer;

impl RecordProcessor<Tweet> for TweetTransformer {
    fn process(&mut self, mut tweet: Tweet) -> Outcome<Tweet> {
        tweet.user = tweet.user.trim().to_string();
        tweet.message = tweet.message.split_whitespace().collect::<Vec<_>>().join(" ");
        if tweet.user.is_empty() {
            return Outcome::fail(anyhow::anyhow!("tweet {} has a blank user", tweet.id));
        }
        if tweet.message.is_empty() {
            return Outcome::fail(anyhow::anyhow!("tweet {} has a blank message", tweet.id));
        }
        Outcome::Continue(tweet)
    }

    fn name(&self) -> &str {
        "tweet-transformer"
    }
}
