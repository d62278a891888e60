use std::ops::Range;

use derive_more::{From, Into};
use typed_index_collections::TiVec;

use crate::{
    block::{decompress, zlib_unless_equal, ByteReader},
    error::{corrupt, Result},
    header::Timescale,
};

/// One value-change block.
#[derive(From, Into, Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// The time span and change times of one value-change block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Epoch {
    pub start_time: u64,
    pub end_time: u64,
    /// Every time at which some signal changed in this block, ascending.
    pub times: Vec<u64>,
}

/// Global time metadata plus the per-epoch time tables. Immutable once the
/// trace is open.
#[derive(Clone, Debug)]
pub struct TimeTable {
    timescale: Timescale,
    time_zero: i64,
    start_time: u64,
    end_time: u64,
    /// Half-open `[dump off, dump on)` intervals, sorted and disjoint.
    blackouts: Vec<Range<u64>>,
    epochs: TiVec<BlockId, Epoch>,
}

impl TimeTable {
    pub fn new(
        timescale: Timescale,
        time_zero: i64,
        start_time: u64,
        end_time: u64,
        blackouts: Vec<Range<u64>>,
        epochs: TiVec<BlockId, Epoch>,
    ) -> Self {
        Self {
            timescale,
            time_zero,
            start_time,
            end_time,
            blackouts,
            epochs,
        }
    }

    pub fn timescale(&self) -> Timescale {
        self.timescale
    }

    pub fn time_zero(&self) -> i64 {
        self.time_zero
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn contains(&self, time: u64) -> bool {
        (self.start_time..=self.end_time).contains(&time)
    }

    pub fn blackouts(&self) -> &[Range<u64>] {
        &self.blackouts
    }

    pub fn time_is_blacked_out(&self, time: u64) -> bool {
        let idx = self.blackouts.partition_point(|b| b.start <= time);
        idx.checked_sub(1)
            .map(|i| self.blackouts[i].contains(&time))
            .unwrap_or(false)
    }

    pub fn epochs(&self) -> &TiVec<BlockId, Epoch> {
        &self.epochs
    }

    pub fn epoch(&self, block: BlockId) -> &Epoch {
        &self.epochs[block]
    }

    /// The epoch whose data covers `time`: the last one starting at or before it.
    pub fn epoch_for(&self, time: u64) -> Option<BlockId> {
        let idx = self.epochs.raw.partition_point(|e| e.start_time <= time);
        idx.checked_sub(1).map(BlockId)
    }
}

/// Decode a time table section: `count` varint deltas, cumulative from 0.
pub fn decode_times(data: &[u8], uncompressed_length: u64, count: u64) -> Result<Vec<u64>> {
    let data = decompress(
        data,
        zlib_unless_equal(data.len() as u64, uncompressed_length),
        uncompressed_length,
        "time table",
    )?;
    let mut r = ByteReader::new(&data, "time table");
    let mut times = Vec::with_capacity(count.min(data.len() as u64) as usize);
    let mut time: u64 = 0;
    for n in 0..count {
        let delta = r.read_varint()?;
        time = match time.checked_add(delta) {
            Some(t) => t,
            None => corrupt!("time table entry {n} overflows"),
        };
        times.push(time);
    }
    Ok(times)
}

/// Decode a blackout block payload into dump-off intervals. An unterminated
/// dump-off runs through `end_time`.
pub fn decode_blackouts(payload: &[u8], end_time: u64) -> Result<Vec<Range<u64>>> {
    let mut r = ByteReader::new(payload, "blackout block");
    let count = r.read_varint()?;

    let mut intervals = Vec::new();
    let mut off_since: Option<u64> = None;
    let mut time: u64 = 0;

    for _ in 0..count {
        let dump_on = r.read_u8()? != 0;
        time = time.saturating_add(r.read_varint()?);
        match (dump_on, off_since) {
            (false, None) => off_since = Some(time),
            (true, Some(start)) => {
                if time > start {
                    intervals.push(start..time);
                }
                off_since = None;
            }
            // Repeated offs or ons don't change anything.
            _ => {}
        }
    }
    if let Some(start) = off_since {
        let end = end_time.saturating_add(1).max(start.saturating_add(1));
        if end > start {
            intervals.push(start..end);
        }
    }
    Ok(intervals)
}
