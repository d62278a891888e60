//! Gtkwave FST waveform reader with time-indexed queries.
//!
//! ```no_run
//! let trace = fstq::Trace::open("alu.fst")?;
//! let op = trace.value_at_time("top.alu.op", 75)?;
//! let next = trace.next_time_change("top.alu.op", 75)?;
//! # Ok::<(), fstq::TraceError>(())
//! ```
//!
//! # Format Specification
//!
//! There is no official specification. A description reverse engineered
//! from the GtkWave source code is here:
//! https://blog.timhutt.co.uk/fst_spec/

pub mod block;
pub mod enums;
pub mod error;
pub mod geometry;
pub mod header;
pub mod hierarchy;
pub mod timetable;
pub mod trace;
pub mod valvec;
pub mod values;
pub mod varint;

pub use error::{ErrorKind, Result, TraceError};
pub use header::{FileType, Timescale, TimescaleUnit};
pub use hierarchy::{ScopeId, StreamId, VarDirection, VarId, VarKind};
pub use trace::{Metadata, Sample, Trace, VariableInfo};
pub use valvec::{ChangeRecord, Value};
