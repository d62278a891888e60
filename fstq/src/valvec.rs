use std::{borrow::Cow, fmt};

/// A decoded signal value, kept as its literal text: one character per bit
/// (`0`, `1`, `x`, `z`, `h`, `u`, `w`, `l`, `-`, `?`) for bit vectors, the
/// decimal rendering for reals and the raw bytes for strings.
///
/// With 16 bytes inline this is the same size as a `Vec<u8>`, so values up to
/// 16 bits never touch the heap.
#[derive(Eq, PartialEq, Clone, Debug, Default, Hash)]
pub struct Value(pub tinyvec::TinyVec<[u8; 16]>);

impl Value {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut v = tinyvec::TinyVec::<[u8; 16]>::with_capacity(bytes.len());
        v.extend_from_slice(bytes);
        Value(v)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from_bytes(s.as_bytes())
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// The value a signal takes from `time` until the next record.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct ChangeRecord {
    pub time: u64,
    pub value: Value,
}

/// The decoded changes of one stream within one epoch, sorted by time with no
/// duplicate times.
#[derive(Clone, Debug, Default)]
pub struct ValAndTimeVec {
    records: Vec<ChangeRecord>,
}

impl ValAndTimeVec {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    /// Append a record. Times must not decrease; a record at the same time
    /// as the last one replaces it.
    pub(crate) fn push(&mut self, time: u64, value: Value) {
        match self.records.last_mut() {
            Some(last) if last.time == time => last.value = value,
            _ => self.records.push(ChangeRecord { time, value }),
        }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record holding at `time`: the one with the greatest time <= `time`.
    pub fn at(&self, time: u64) -> Option<&ChangeRecord> {
        let idx = self.records.partition_point(|r| r.time <= time);
        idx.checked_sub(1).map(|i| &self.records[i])
    }

    /// All records strictly after `time`.
    pub fn after(&self, time: u64) -> &[ChangeRecord] {
        let idx = self.records.partition_point(|r| r.time <= time);
        &self.records[idx..]
    }
}
