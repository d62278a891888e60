//! An opened trace and the queries it answers.

use std::{
    fs::File,
    io::{BufReader, Cursor},
    ops::Range,
    path::Path,
    sync::Arc,
};

use log::{debug, info, warn};
use typed_index_collections::TiVec;

use crate::{
    block::{decompress, BlockHeader, BlockStream, BlockType, ByteReader, Compression, ReadSeek},
    enums::EnumTables,
    error::{corrupt, Result, TraceError},
    geometry::{SignalLength, VarLengths},
    header::{FileType, Header, Timescale},
    hierarchy::{HierarchyCompression, HierarchyIndex, StreamId, VarDirection, VarId, VarKind, Variable},
    timetable::{decode_blackouts, BlockId, TimeTable},
    valvec::{ChangeRecord, Value},
    values::{EpochLayout, ValueStore},
};

/// What a signal is doing at a point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sample {
    Value(Value),
    /// The time precedes the signal's first recorded value.
    NoPriorValue,
    /// The time falls in a dump-off interval.
    Blackout,
}

impl Sample {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Sample::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Sample::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub timescale: Timescale,
    pub time_zero: i64,
    pub start_time: u64,
    pub end_time: u64,
    pub blackouts: Vec<Range<u64>>,
    pub variable_count: usize,
    pub scope_count: usize,
    pub stream_count: usize,
    pub alias_count: usize,
    pub epoch_count: usize,
    pub enum_table_count: usize,
    /// The simulator or tool that wrote the file.
    pub writer: String,
    pub date: String,
    pub file_type: Option<FileType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    pub id: VarId,
    /// Fully qualified name.
    pub name: String,
    /// Name within its scope.
    pub local_name: String,
    pub bit_width: u32,
    pub length: SignalLength,
    pub kind: VarKind,
    pub direction: VarDirection,
    /// Dotted path of the enclosing scope, empty at top level.
    pub scope_path: String,
    /// Fully qualified name of the variable this one aliases.
    pub alias_of: Option<String>,
    pub stream: StreamId,
    /// Name of the enum table the variable was declared with.
    pub enum_table: Option<String>,
}

/// A read-only, thread-safe view of an FST file.
///
/// The header, hierarchy, enum tables and time tables are decoded when the
/// trace is opened. Value changes are decoded on demand, one stream and epoch
/// at a time, and cached.
pub struct Trace {
    header: Header,
    hierarchy: HierarchyIndex,
    enum_tables: EnumTables,
    time_table: TimeTable,
    values: ValueStore,
}

impl Trace {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TraceError::IoFailure {
            context: format!("opening {}", path.display()),
            source: Arc::new(e),
        })?;
        info!("Opening {}", path.display());
        Self::load(Box::new(BufReader::new(file)), false)
    }

    /// Open an in-memory image of an FST file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::load(Box::new(Cursor::new(bytes)), false)
    }

    /// Open an FST file from any seekable reader. Values are read from it
    /// on demand, so it must stay readable for the life of the trace.
    pub fn from_reader<R: ReadSeek + 'static>(reader: R) -> Result<Self> {
        Self::load(Box::new(reader), false)
    }

    fn load(reader: Box<dyn ReadSeek>, unwrapped: bool) -> Result<Self> {
        let mut blocks = BlockStream::new(reader)?;

        let mut header = None;
        let mut geometry = None;
        let mut hierarchy = None;
        let mut blackout = None;
        let mut vc_blocks: Vec<BlockHeader> = Vec::new();

        while let Some(block) = blocks.next_block()? {
            if header.is_none() && !matches!(block.kind, BlockType::Header | BlockType::GzipWrapper) {
                corrupt!("file starts with a {:?} block instead of a header", block.kind);
            }
            match block.kind {
                BlockType::Header => {
                    if header.is_some() {
                        corrupt!("second header block at offset {}", block.offset);
                    }
                    header = Some(Header::parse(&blocks.read_payload(&block)?)?);
                }
                BlockType::GzipWrapper => {
                    if header.is_some() || unwrapped {
                        corrupt!("unexpected gzip wrapper block at offset {}", block.offset);
                    }
                    let inner = Self::unwrap_gzip(&blocks.read_payload(&block)?)?;
                    debug!("Inflated gzip wrapper to {} bytes", inner.len());
                    return Self::load(Box::new(Cursor::new(inner)), true);
                }
                BlockType::ValueChange | BlockType::ValueChangeDynAlias | BlockType::ValueChangeDynAlias2 => {
                    vc_blocks.push(block);
                }
                BlockType::Blackout => blackout = Some(blocks.read_payload(&block)?),
                BlockType::Geometry => geometry = Some(VarLengths::parse(&blocks.read_payload(&block)?)?),
                BlockType::Hierarchy | BlockType::HierarchyLz4 | BlockType::HierarchyLz4Duo => {
                    if hierarchy.is_some() {
                        warn!("Ignoring extra hierarchy block at offset {}", block.offset);
                        continue;
                    }
                    let compression = match block.kind {
                        BlockType::HierarchyLz4 => HierarchyCompression::Lz4,
                        BlockType::HierarchyLz4Duo => HierarchyCompression::Lz4Duo,
                        _ => HierarchyCompression::GzipOrStored,
                    };
                    hierarchy = Some(HierarchyIndex::from_block(&blocks.read_payload(&block)?, compression)?);
                }
                BlockType::Skip => warn!("Skipping unfinished block at offset {}", block.offset),
            }
        }

        let Some(header) = header else {
            corrupt!("no header block");
        };
        let Some(hierarchy) = hierarchy else {
            corrupt!("no hierarchy block");
        };

        let declared = (header.num_scopes, header.num_hierarchy_vars, header.num_streams);
        let found = (
            hierarchy.scope_count() as u64,
            hierarchy.var_count() as u64,
            hierarchy.stream_count() as u64,
        );
        if declared != found {
            warn!(
                "Header declares {} scopes, {} variables and {} streams but the hierarchy has {}, {} and {}",
                declared.0, declared.1, declared.2, found.0, found.1, found.2
            );
        }

        let lengths = stream_lengths(geometry.as_ref(), &hierarchy)?;

        let mut epochs = Vec::with_capacity(vc_blocks.len());
        for block in &vc_blocks {
            epochs.push(EpochLayout::read(&mut blocks, block, lengths.len())?);
        }
        epochs.sort_by_key(|(_, epoch)| epoch.start_time);
        if epochs.len() as u64 != header.num_vc_blocks {
            warn!(
                "Header declares {} value change blocks but the file has {}",
                header.num_vc_blocks,
                epochs.len()
            );
        }
        let (layouts, epochs): (TiVec<BlockId, _>, TiVec<BlockId, _>) = epochs.into_iter().unzip();

        let blackouts = match blackout {
            Some(payload) => decode_blackouts(&payload, header.end_time)?,
            None => Vec::new(),
        };

        let time_table = TimeTable::new(
            header.timescale,
            header.time_zero,
            header.start_time,
            header.end_time,
            blackouts,
            epochs,
        );
        let enum_tables = EnumTables::from_decls(hierarchy.enum_decls());
        let values = ValueStore::new(blocks.into_inner(), header.float_endian, lengths, layouts);

        info!(
            "Loaded trace: {} scopes, {} variables on {} streams, {} value change blocks, times {}..={} ({})",
            hierarchy.scope_count(),
            hierarchy.var_count(),
            hierarchy.stream_count(),
            time_table.epochs().len(),
            header.start_time,
            header.end_time,
            header.timescale,
        );

        Ok(Trace {
            header,
            hierarchy,
            enum_tables,
            time_table,
            values,
        })
    }

    fn unwrap_gzip(payload: &[u8]) -> Result<Vec<u8>> {
        let mut r = ByteReader::new(payload, "gzip wrapper");
        let uncompressed_length = r.read_u64()?;
        let data = r.read_bytes(r.remaining())?;
        decompress(data, Compression::Gzip, uncompressed_length, "gzip wrapper")
    }

    fn resolve(&self, op: &'static str, name: &str) -> Result<&Variable> {
        match self.hierarchy.resolve(name) {
            Some(id) => Ok(self.hierarchy.var(id)),
            None => Err(TraceError::UnknownVariable {
                op,
                name: name.to_string(),
            }),
        }
    }

    fn check_time(&self, op: &'static str, name: &str, time: i64) -> Result<u64> {
        match u64::try_from(time) {
            Ok(t) if self.time_table.contains(t) => Ok(t),
            _ => Err(TraceError::TimeOutOfRange {
                op,
                variable: name.to_string(),
                time,
                start: self.time_table.start_time(),
                end: self.time_table.end_time(),
            }),
        }
    }

    fn sample(&self, op: &'static str, name: &str, time: i64) -> Result<Sample> {
        let var = self.resolve(op, name)?;
        let time = self.check_time(op, name, time)?;
        if self.time_table.time_is_blacked_out(time) {
            return Ok(Sample::Blackout);
        }
        Ok(match self.values.value_at(&self.time_table, var.stream, time)? {
            Some(record) => Sample::Value(record.value),
            None => Sample::NoPriorValue,
        })
    }

    /// Fully qualified names of every variable, in declaration order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.hierarchy.vars().map(|v| v.full_name.as_str())
    }

    /// What `name` is doing at `time`.
    pub fn sample_at_time(&self, name: &str, time: i64) -> Result<Sample> {
        self.sample("sample_at_time", name, time)
    }

    /// The value of `name` at `time`, or `None` before its first value and
    /// during blackouts.
    pub fn value_at_time(&self, name: &str, time: i64) -> Result<Option<Value>> {
        Ok(self.sample("value_at_time", name, time)?.into_value())
    }

    /// The value of `name` at `time` mapped through the enum table `table`.
    /// Patterns the table does not cover come back as the raw literal.
    pub fn enum_value_at_time(&self, name: &str, table: &str, time: i64) -> Result<Option<String>> {
        const OP: &str = "enum_value_at_time";
        self.resolve(OP, name)?;
        let Some(table) = self.enum_tables.get(table) else {
            return Err(TraceError::UnknownEnumTable {
                op: OP,
                variable: name.to_string(),
                table: table.to_string(),
            });
        };
        Ok(self
            .sample(OP, name, time)?
            .value()
            .map(|v| table.lookup(v)))
    }

    /// The first time after `after` at which `name` takes a different value.
    /// Blackouts are not taken into account.
    pub fn next_time_change(&self, name: &str, after: i64) -> Result<Option<u64>> {
        let var = self.resolve("next_time_change", name)?;
        let stream = var.stream;
        match u64::try_from(after) {
            Ok(t) => self.values.next_change_after(&self.time_table, stream, t),
            Err(_) => match self.values.value_at(&self.time_table, stream, 0)? {
                Some(record) if record.time == 0 => Ok(Some(0)),
                _ => self.values.next_change_after(&self.time_table, stream, 0),
            },
        }
    }

    /// Every change of `name` in time order.
    pub fn value_changes(&self, name: &str) -> Result<Vec<ChangeRecord>> {
        let var = self.resolve("value_changes", name)?;
        self.values.all_changes(&self.time_table, var.stream)
    }

    pub fn timescale(&self) -> Timescale {
        self.time_table.timescale()
    }

    pub fn time_zero(&self) -> i64 {
        self.time_table.time_zero()
    }

    pub fn blackouts(&self) -> &[Range<u64>] {
        self.time_table.blackouts()
    }

    pub fn time_is_blacked_out(&self, time: u64) -> bool {
        self.time_table.time_is_blacked_out(time)
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            timescale: self.time_table.timescale(),
            time_zero: self.time_table.time_zero(),
            start_time: self.time_table.start_time(),
            end_time: self.time_table.end_time(),
            blackouts: self.time_table.blackouts().to_vec(),
            variable_count: self.hierarchy.var_count(),
            scope_count: self.hierarchy.scope_count(),
            stream_count: self.hierarchy.stream_count(),
            alias_count: self.hierarchy.alias_count(),
            epoch_count: self.time_table.epochs().len(),
            enum_table_count: self.enum_tables.len(),
            writer: self.header.writer.clone(),
            date: self.header.date.clone(),
            file_type: self.header.file_type,
        }
    }

    pub fn variable_info(&self, name: &str) -> Result<VariableInfo> {
        let var = self.resolve("variable_info", name)?;
        let length = self
            .values
            .length(var.stream)
            .unwrap_or_else(|| declared_length(var));
        Ok(VariableInfo {
            id: var.id,
            name: var.full_name.clone(),
            local_name: var.name.clone(),
            bit_width: length.bit_width(),
            length,
            kind: var.kind,
            direction: var.direction,
            scope_path: var
                .scope
                .map(|s| self.hierarchy.scope(s).full_name.clone())
                .unwrap_or_default(),
            alias_of: var.alias_of.map(|id| self.hierarchy.var(id).full_name.clone()),
            stream: var.stream,
            enum_table: var
                .enum_handle
                .and_then(|h| self.enum_tables.by_handle(h))
                .map(|t| t.name.clone()),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn hierarchy(&self) -> &HierarchyIndex {
        &self.hierarchy
    }

    pub fn enum_tables(&self) -> &EnumTables {
        &self.enum_tables
    }

    pub fn time_table(&self) -> &TimeTable {
        &self.time_table
    }

    /// Number of `(stream, epoch)` pairs decoded so far.
    pub fn decoded_count(&self) -> usize {
        self.values.decoded_count()
    }
}

/// Storage length of a stream according to its hierarchy declaration.
fn declared_length(var: &Variable) -> SignalLength {
    match var.kind {
        VarKind::Real | VarKind::RealParameter | VarKind::RealTime | VarKind::ShortReal => SignalLength::Real,
        VarKind::String => SignalLength::Variable,
        _ => SignalLength::Bits(u32::try_from(var.declared_length).unwrap_or(u32::MAX)),
    }
}

/// One length per stream: the geometry block's where it has one, otherwise
/// what the hierarchy declared.
fn stream_lengths(geometry: Option<&VarLengths>, hierarchy: &HierarchyIndex) -> Result<TiVec<StreamId, SignalLength>> {
    let mut lengths: TiVec<StreamId, SignalLength> = match geometry {
        Some(g) => g.iter().collect(),
        None => TiVec::new(),
    };
    if geometry.is_none() {
        debug!("No geometry block, using declared lengths");
    }
    for stream in (lengths.len()..hierarchy.stream_count()).map(StreamId) {
        match hierarchy.stream_owner(stream) {
            Some(owner) => lengths.push(declared_length(owner)),
            None => corrupt!("stream {} has no declaring variable", stream.0),
        }
    }
    Ok(lengths)
}
