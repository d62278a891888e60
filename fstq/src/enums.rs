//! Named enumeration tables mapping raw bit patterns to symbolic labels.

use std::collections::HashMap;

use log::warn;

use crate::{
    error::{corrupt, Result},
    hierarchy::EnumTableDecl,
    valvec::Value,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumTable {
    pub name: String,
    pub handle: u64,
    /// `(pattern, label)` in declaration order.
    pub entries: Vec<(String, String)>,
    by_pattern: HashMap<String, usize>,
}

impl EnumTable {
    /// Parse `name count label_1 .. label_n pattern_1 .. pattern_n`.
    pub fn parse(definition: &str, handle: u64) -> Result<Self> {
        let mut tokens = definition.split_whitespace();
        let name = match tokens.next() {
            Some(n) => unescape(n),
            None => corrupt!("enum table #{handle} has an empty definition"),
        };
        let count: usize = match tokens.next().map(str::parse::<usize>) {
            Some(Ok(c)) => c,
            _ => corrupt!("enum table {name:?} has no valid entry count"),
        };
        let rest: Vec<&str> = tokens.collect();
        if rest.len() != 2 * count {
            corrupt!(
                "enum table {name:?} declares {count} entries but has {} tokens",
                rest.len()
            );
        }
        let (labels, patterns) = rest.split_at(count);

        let mut table = EnumTable {
            name,
            handle,
            entries: Vec::with_capacity(count),
            by_pattern: HashMap::with_capacity(count),
        };
        for (label, pattern) in labels.iter().zip(patterns) {
            let pattern = unescape(pattern);
            let key = pattern_key(&pattern).to_string();
            table.by_pattern.entry(key).or_insert(table.entries.len());
            table.entries.push((pattern, unescape(label)));
        }
        Ok(table)
    }

    /// The label for `raw`, if the table has one.
    pub fn label(&self, raw: &str) -> Option<&str> {
        let idx = *self.by_pattern.get(pattern_key(raw))?;
        Some(self.entries[idx].1.as_str())
    }

    /// The label for `raw`, falling back to the raw literal for patterns the
    /// table does not cover.
    pub fn lookup(&self, raw: &Value) -> String {
        let raw = raw.as_str();
        match self.label(&raw) {
            Some(label) => label.to_string(),
            None => raw.into_owned(),
        }
    }
}

/// Binary patterns compare by value, so the leading zeros a writer pads
/// patterns with do not matter. Anything with x/z/etc. compares verbatim.
fn pattern_key(pattern: &str) -> &str {
    if !pattern.is_empty() && pattern.bytes().all(|c| c == b'0' || c == b'1') {
        let trimmed = pattern.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    } else {
        pattern
    }
}

/// Undo the writer's C-style escaping of enum table tokens (`\x20` for a
/// space and so on).
pub fn unescape(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let c = bytes[i + 1];
        i += 2;
        match c {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0B),
            b'x' | b'X' => {
                let hex = &bytes[i..bytes.len().min(i + 2)];
                match std::str::from_utf8(hex).ok().and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(v) if hex.len() == 2 => {
                        out.push(v);
                        i += 2;
                    }
                    _ => out.extend_from_slice(&[b'\\', c]),
                }
            }
            b'0'..=b'7' => {
                let end = bytes.len().min(i + 2);
                let oct = &bytes[i - 1..end];
                match std::str::from_utf8(oct).ok().and_then(|o| u8::from_str_radix(o, 8).ok()) {
                    Some(v) if oct.len() == 3 => {
                        out.push(v);
                        i = end;
                    }
                    _ => out.extend_from_slice(&[b'\\', c]),
                }
            }
            other => out.push(other),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// All enum tables of a trace, by name and by handle.
#[derive(Clone, Debug, Default)]
pub struct EnumTables {
    tables: Vec<EnumTable>,
    by_name: HashMap<String, usize>,
    by_handle: HashMap<u64, usize>,
}

impl EnumTables {
    /// Build the tables from their hierarchy declarations. A malformed table
    /// is skipped rather than failing the whole trace.
    pub fn from_decls(decls: &[EnumTableDecl]) -> Self {
        let mut tables = EnumTables::default();
        for decl in decls {
            match EnumTable::parse(&decl.definition, decl.handle) {
                Ok(table) => tables.insert(table),
                Err(e) => warn!("Ignoring enum table #{}: {e}", decl.handle),
            }
        }
        tables
    }

    pub fn insert(&mut self, table: EnumTable) {
        let idx = self.tables.len();
        self.by_name.entry(table.name.clone()).or_insert(idx);
        self.by_handle.entry(table.handle).or_insert(idx);
        self.tables.push(table);
    }

    pub fn get(&self, name: &str) -> Option<&EnumTable> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    pub fn by_handle(&self, handle: u64) -> Option<&EnumTable> {
        self.by_handle.get(&handle).map(|&i| &self.tables[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnumTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
