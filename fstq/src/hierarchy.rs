use std::{collections::HashMap, fmt};

use derive_more::{From, Into};
use log::debug;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use typed_index_collections::TiVec;

use crate::{
    block::{decompress, ByteReader, Compression},
    error::{corrupt, Result},
};

/// One declared variable (each name in the hierarchy gets its own).
#[derive(From, Into, Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// One value-change stream. Aliased variables share a stream.
#[derive(From, Into, Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId(pub usize);

#[derive(From, Into, Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

const FST_ST_GEN_ATTRBEGIN: u8 = 252;
const FST_ST_GEN_ATTREND: u8 = 253;
const FST_ST_VCD_SCOPE: u8 = 254;
const FST_ST_VCD_UPSCOPE: u8 = 255;

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VarKind {
    Event = 0,
    Integer = 1,
    Parameter = 2,
    Real = 3,
    RealParameter = 4,
    Reg = 5,
    Supply0 = 6,
    Supply1 = 7,
    Time = 8,
    Tri = 9,
    TriAnd = 10,
    TriOr = 11,
    TriReg = 12,
    Tri0 = 13,
    Tri1 = 14,
    WAnd = 15,
    Wire = 16,
    WOr = 17,
    Port = 18,
    SparseArray = 19,
    RealTime = 20,
    String = 21,
    Bit = 22,
    Logic = 23,
    Int = 24,
    ShortInt = 25,
    LongInt = 26,
    Byte = 27,
    Enum = 28,
    ShortReal = 29,
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarKind::Event => "event",
            VarKind::Integer => "integer",
            VarKind::Parameter => "parameter",
            VarKind::Real => "real",
            VarKind::RealParameter => "real_parameter",
            VarKind::Reg => "reg",
            VarKind::Supply0 => "supply0",
            VarKind::Supply1 => "supply1",
            VarKind::Time => "time",
            VarKind::Tri => "tri",
            VarKind::TriAnd => "triand",
            VarKind::TriOr => "trior",
            VarKind::TriReg => "trireg",
            VarKind::Tri0 => "tri0",
            VarKind::Tri1 => "tri1",
            VarKind::WAnd => "wand",
            VarKind::Wire => "wire",
            VarKind::WOr => "wor",
            VarKind::Port => "port",
            VarKind::SparseArray => "sparray",
            VarKind::RealTime => "realtime",
            VarKind::String => "string",
            VarKind::Bit => "bit",
            VarKind::Logic => "logic",
            VarKind::Int => "int",
            VarKind::ShortInt => "shortint",
            VarKind::LongInt => "longint",
            VarKind::Byte => "byte",
            VarKind::Enum => "enum",
            VarKind::ShortReal => "shortreal",
        })
    }
}

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VarDirection {
    Implicit = 0,
    Input = 1,
    Output = 2,
    InOut = 3,
    Buffer = 4,
    Linkage = 5,
}

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScopeKind {
    Module = 0,
    Task = 1,
    Function = 2,
    Begin = 3,
    Fork = 4,
    Generate = 5,
    Struct = 6,
    Union = 7,
    Class = 8,
    Interface = 9,
    Package = 10,
    Program = 11,
    VhdlArchitecture = 12,
    VhdlProcedure = 13,
    VhdlFunction = 14,
    VhdlRecord = 15,
    VhdlProcess = 16,
    VhdlBlock = 17,
    VhdlForGenerate = 18,
    VhdlIfGenerate = 19,
    VhdlGenerate = 20,
    VhdlPackage = 21,
}

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttributeKind {
    Misc = 0,
    Array = 1,
    Enum = 2,
    Pack = 3,
}

/// Subtypes of [`AttributeKind::Misc`].
pub const FST_MT_COMMENT: u8 = 0;
pub const FST_MT_SOURCESTEM: u8 = 4;
pub const FST_MT_SOURCEISTEM: u8 = 5;
pub const FST_MT_ENUMTABLE: u8 = 7;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub kind: Option<AttributeKind>,
    pub subtype: u8,
    pub name: String,
    pub arg: u64,
}

impl Attribute {
    fn is_enum_table(&self) -> bool {
        self.kind == Some(AttributeKind::Misc) && self.subtype == FST_MT_ENUMTABLE
    }
}

#[derive(Clone, Debug)]
pub struct Scope {
    pub kind: Option<ScopeKind>,
    pub name: String,
    pub component: String,
    /// Dotted path from the root, including this scope's own name.
    pub full_name: String,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub vars: Vec<VarId>,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub id: VarId,
    pub kind: VarKind,
    pub direction: VarDirection,
    /// Name as declared, e.g. `alu_op [3:0]`.
    pub name: String,
    /// Scope path and name joined by `.`.
    pub full_name: String,
    /// Length as declared in the hierarchy.
    pub declared_length: u64,
    pub stream: StreamId,
    /// The first variable declared on the same stream, if this is an alias.
    pub alias_of: Option<VarId>,
    pub scope: Option<ScopeId>,
    /// Handle of an enum table this variable refers to.
    pub enum_handle: Option<u64>,
    /// Attributes other than the enum reference, e.g. source locations.
    pub attributes: Vec<Attribute>,
}

/// A variable token as read from the hierarchy.
struct VarDecl {
    kind: VarKind,
    direction: VarDirection,
    name: String,
    declared_length: u64,
    alias: u64,
    enum_handle: Option<u64>,
    attributes: Vec<Attribute>,
}

/// An enum table as declared in the hierarchy, not yet split into entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumTableDecl {
    pub handle: u64,
    pub definition: String,
}

/// The decoded hierarchy: a scope tree plus a flat, name-addressable table
/// of variables.
#[derive(Debug, Default)]
pub struct HierarchyIndex {
    scopes: TiVec<ScopeId, Scope>,
    roots: Vec<ScopeId>,
    vars: TiVec<VarId, Variable>,
    /// First variable declared on each stream.
    stream_owners: TiVec<StreamId, VarId>,
    by_name: HashMap<String, VarId>,
    enum_decls: Vec<EnumTableDecl>,
    /// Comment attributes, in declaration order.
    comments: Vec<String>,
    alias_count: usize,
}

impl HierarchyIndex {
    /// Decode a hierarchy block payload of the given kind.
    pub fn from_block(payload: &[u8], compression: HierarchyCompression) -> Result<Self> {
        let mut r = ByteReader::new(payload, "hierarchy block");
        let uncompressed_length = r.read_u64()?;
        let compression = match compression {
            HierarchyCompression::GzipOrStored => {
                if r.remaining() >= 2 && payload[8..10] == [0x1f, 0x8b] {
                    Compression::Gzip
                } else {
                    Compression::Stored
                }
            }
            HierarchyCompression::Lz4 => Compression::Lz4,
            HierarchyCompression::Lz4Duo => Compression::Lz4Duo(r.read_u64()?),
        };
        let data = r.read_bytes(r.remaining())?;
        let tokens = decompress(data, compression, uncompressed_length, "hierarchy block")?;
        Self::decode(&tokens)
    }

    /// Walk the hierarchy token stream.
    pub fn decode(tokens: &[u8]) -> Result<Self> {
        let mut index = HierarchyIndex::default();
        let mut r = ByteReader::new(tokens, "hierarchy tokens");

        let mut current: Option<ScopeId> = None;
        // Writers never close attributes. Each one applies to the next scope
        // or variable declared.
        let mut pending: Vec<Attribute> = Vec::new();

        while !r.is_empty() {
            match r.read_u8()? {
                FST_ST_GEN_ATTRBEGIN => {
                    let attr = Attribute {
                        kind: AttributeKind::from_u8(r.read_u8()?),
                        subtype: r.read_u8()?,
                        name: r.read_cstr()?,
                        arg: r.read_varint()?,
                    };
                    if attr.is_enum_table() && !attr.name.is_empty() {
                        debug!("Enum table #{}: {}", attr.arg, attr.name);
                        index.enum_decls.push(EnumTableDecl {
                            handle: attr.arg,
                            definition: attr.name,
                        });
                    } else if attr.kind == Some(AttributeKind::Misc) && attr.subtype == FST_MT_COMMENT {
                        index.comments.push(attr.name);
                    } else {
                        pending.push(attr);
                    }
                }
                FST_ST_GEN_ATTREND => {
                    debug!("Ignoring attribute end at offset {}", r.position() - 1);
                }
                FST_ST_VCD_SCOPE => {
                    let kind = ScopeKind::from_u8(r.read_u8()?);
                    let name = r.read_cstr()?;
                    let component = r.read_cstr()?;
                    let scope = index.push_scope(current, kind, name, component);
                    for attr in pending.drain(..) {
                        if attr.is_enum_table() {
                            debug!("Dropping enum table reference #{} on a scope", attr.arg);
                        } else {
                            index.scopes[scope].attributes.push(attr);
                        }
                    }
                    current = Some(scope);
                }
                FST_ST_VCD_UPSCOPE => {
                    current = match current {
                        Some(scope) => index.scopes[scope].parent,
                        None => corrupt!("hierarchy closes a scope that was never opened"),
                    };
                }
                tag => {
                    let kind = match VarKind::from_u8(tag) {
                        Some(k) => k,
                        None => corrupt!("unknown hierarchy tag {tag} at offset {}", r.position() - 1),
                    };
                    let direction = VarDirection::from_u8(r.read_u8()?).unwrap_or(VarDirection::Implicit);
                    let name = r.read_cstr()?;
                    let declared_length = r.read_varint()?;
                    let alias = r.read_varint()?;

                    // The last enum table reference wins.
                    let mut enum_handle = None;
                    let mut attributes = Vec::new();
                    for attr in pending.drain(..) {
                        if attr.is_enum_table() {
                            enum_handle = Some(attr.arg);
                        } else {
                            attributes.push(attr);
                        }
                    }

                    index.push_var(
                        current,
                        VarDecl {
                            kind,
                            direction,
                            name,
                            declared_length,
                            alias,
                            enum_handle,
                            attributes,
                        },
                    )?;
                }
            }
        }
        if !pending.is_empty() {
            debug!("Ignoring {} attributes after the last declaration", pending.len());
        }

        debug!(
            "Hierarchy: {} scopes, {} vars, {} streams, {} aliases",
            index.scopes.len(),
            index.vars.len(),
            index.stream_owners.len(),
            index.alias_count
        );
        Ok(index)
    }

    fn push_scope(
        &mut self,
        parent: Option<ScopeId>,
        kind: Option<ScopeKind>,
        name: String,
        component: String,
    ) -> ScopeId {
        let full_name = match parent {
            Some(p) => format!("{}.{}", self.scopes[p].full_name, name),
            None => name.clone(),
        };
        let id = self.scopes.push_and_get_key(Scope {
            kind,
            name,
            component,
            full_name,
            parent,
            children: Vec::new(),
            vars: Vec::new(),
            attributes: Vec::new(),
        });
        match parent {
            Some(p) => self.scopes[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn push_var(&mut self, scope: Option<ScopeId>, decl: VarDecl) -> Result<VarId> {
        let VarDecl {
            kind,
            direction,
            name,
            declared_length,
            alias,
            enum_handle,
            attributes,
        } = decl;
        let id = self.vars.next_key();

        let (stream, alias_of) = if alias == 0 {
            // A new stream, numbered in declaration order.
            (self.stream_owners.push_and_get_key(id), None)
        } else {
            let stream = StreamId(alias as usize - 1);
            match self.stream_owners.get(stream) {
                Some(&owner) => {
                    self.alias_count += 1;
                    (stream, Some(owner))
                }
                None => corrupt!(
                    "variable {name:?} aliases stream {} which has not been declared",
                    alias
                ),
            }
        };

        let full_name = match scope {
            Some(s) => format!("{}.{}", self.scopes[s].full_name, name),
            None => name.clone(),
        };

        // With duplicate names the first declaration wins.
        self.by_name.entry(full_name.clone()).or_insert(id);
        if let Some(s) = scope {
            self.scopes[s].vars.push(id);
        }

        self.vars.push(Variable {
            id,
            kind,
            direction,
            name,
            full_name,
            declared_length,
            stream,
            alias_of,
            scope,
            enum_handle,
            attributes,
        });
        Ok(id)
    }

    /// Exact-match lookup of a fully-qualified name.
    pub fn resolve(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id]
    }

    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn stream_count(&self) -> usize {
        self.stream_owners.len()
    }

    /// The first variable declared on `stream`.
    pub fn stream_owner(&self, stream: StreamId) -> Option<&Variable> {
        self.stream_owners.get(stream).map(|&id| &self.vars[id])
    }

    pub fn alias_count(&self) -> usize {
        self.alias_count
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Top-level scopes in declaration order.
    pub fn roots(&self) -> &[ScopeId] {
        &self.roots
    }

    pub fn enum_decls(&self) -> &[EnumTableDecl] {
        &self.enum_decls
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }
}

/// Which of the hierarchy block kinds a payload came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HierarchyCompression {
    GzipOrStored,
    Lz4,
    Lz4Duo,
}
