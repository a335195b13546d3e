//! Raw record type produced by sources.

/// An unprocessed unit of input: one line, one row, one message.
///
/// Positions are 1-based and strictly increasing within a run. A record is
/// immutable once a source has produced it; stages only ever see it by
/// reference until a mapper turns it into a domain object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<P> {
    position: u64,
    payload: P,
}

impl<P> RawRecord<P> {
    /// Create a record at the given 1-based position.
    pub fn new(position: u64, payload: P) -> Self {
        Self { position, payload }
    }

    /// 1-based sequence position within the run.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl RawRecord<String> {
    /// Payload as a string slice.
    pub fn as_str(&self) -> &str {
        &self.payload
    }
}

/// Counter that stamps positions onto records as a source produces them.
#[derive(Debug, Default, Clone)]
pub struct Sequence {
    last: u64,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a payload in a record carrying the next position.
    pub fn stamp<P>(&mut self, payload: P) -> RawRecord<P> {
        self.last += 1;
        RawRecord::new(self.last, payload)
    }

    /// Position of the most recently stamped record, 0 if none.
    pub fn last(&self) -> u64 {
        self.last
    }
}
