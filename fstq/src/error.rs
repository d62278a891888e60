use std::{io, sync::Arc};

use thiserror::Error;

/// Coarse classification of a [`TraceError`], for callers that only need to
/// branch on the failure category (e.g. a host-language binding).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IoFailure,
    CorruptFormat,
    TruncatedData,
    Unsupported,
    UnknownVariable,
    UnknownEnumTable,
    TimeOutOfRange,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("[fstq] I/O failure while {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("[fstq] corrupt format: {0}")]
    CorruptFormat(String),
    #[error("[fstq] truncated data while reading {what}: needed {needed} bytes but only {available} remain")]
    TruncatedData {
        what: &'static str,
        needed: u64,
        available: u64,
    },
    #[error("[fstq] unsupported: {0}")]
    Unsupported(String),
    #[error("[fstq] {op}: unknown variable {name:?}")]
    UnknownVariable { op: &'static str, name: String },
    #[error("[fstq] {op}: unknown enum table {table:?} (queried for {variable:?})")]
    UnknownEnumTable {
        op: &'static str,
        variable: String,
        table: String,
    },
    #[error("[fstq] {op}: time {time} for {variable:?} is outside the recorded range {start}..={end}")]
    TimeOutOfRange {
        op: &'static str,
        variable: String,
        time: i64,
        start: u64,
        end: u64,
    },
}

impl TraceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceError::IoFailure { .. } => ErrorKind::IoFailure,
            TraceError::CorruptFormat(_) => ErrorKind::CorruptFormat,
            TraceError::TruncatedData { .. } => ErrorKind::TruncatedData,
            TraceError::Unsupported(_) => ErrorKind::Unsupported,
            TraceError::UnknownVariable { .. } => ErrorKind::UnknownVariable,
            TraceError::UnknownEnumTable { .. } => ErrorKind::UnknownEnumTable,
            TraceError::TimeOutOfRange { .. } => ErrorKind::TimeOutOfRange,
        }
    }

    pub(crate) fn io(what: &'static str, err: io::Error) -> Self {
        TraceError::IoFailure {
            context: what.to_string(),
            source: Arc::new(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// Shorthand for `Err(TraceError::CorruptFormat(format!(...)))`.
macro_rules! corrupt {
    ($($arg:tt)*) => {
        return Err($crate::error::TraceError::CorruptFormat(format!($($arg)*)))
    };
}
pub(crate) use corrupt;
