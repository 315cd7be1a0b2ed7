//! Streaming binary tree encoding for dashboard responses.
//!
//! Responses are a sequence of records, one per leaf of a nested key/value
//! tree, flattened depth-first. Each record is length-prefixed and
//! self-describing:
//!
//! ```text
//! record   := count:u16le component* tag:u8 payload
//! component:= len:u32le bytes          (path component, UTF-8)
//! tag      := 0 none | 1 bool | 2 int | 3 float | 4 string | 5 bytes
//!           | 6 empty list | 7 empty map
//! payload  := bool:u8 | int:i64le | float:f64le
//!           | (string|bytes): len:u32le bytes | (none/empty): nothing
//! ```
//!
//! Lists flatten through decimal-index components, so a truncated stream is
//! always detectable at a record boundary.

use std::io::{self, Read, Write};

/// A value in the encoded tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<TreeValue>),
    Map(Vec<(String, TreeValue)>),
}

impl TreeValue {
    /// Build a map from key/value pairs, preserving insertion order.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, TreeValue)>) -> Self {
        Self::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<bool> for TreeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TreeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for TreeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TreeValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for TreeValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

const TAG_NONE: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_EMPTY_LIST: u8 = 6;
const TAG_EMPTY_MAP: u8 = 7;

/// Encode one tree. Callers flush the writer between trees; each tree's
/// records appear contiguously.
pub fn encode_tree<W: Write>(w: &mut W, tree: &TreeValue) -> io::Result<()> {
    let mut path: Vec<String> = Vec::new();
    encode_node(w, &mut path, tree)
}

fn encode_node<W: Write>(w: &mut W, path: &mut Vec<String>, value: &TreeValue) -> io::Result<()> {
    match value {
        TreeValue::Map(entries) if !entries.is_empty() => {
            for (key, child) in entries {
                path.push(key.clone());
                encode_node(w, path, child)?;
                path.pop();
            }
            Ok(())
        }
        TreeValue::List(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                encode_node(w, path, child)?;
                path.pop();
            }
            Ok(())
        }
        leaf => encode_leaf(w, path, leaf),
    }
}

fn encode_leaf<W: Write>(w: &mut W, path: &[String], leaf: &TreeValue) -> io::Result<()> {
    let count = u16::try_from(path.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "tree path too deep"))?;
    w.write_all(&count.to_le_bytes())?;
    for component in path {
        write_blob(w, component.as_bytes())?;
    }
    match leaf {
        TreeValue::Null => w.write_all(&[TAG_NONE]),
        TreeValue::Bool(v) => {
            w.write_all(&[TAG_BOOL])?;
            w.write_all(&[u8::from(*v)])
        }
        TreeValue::Int(v) => {
            w.write_all(&[TAG_INT])?;
            w.write_all(&v.to_le_bytes())
        }
        TreeValue::Float(v) => {
            w.write_all(&[TAG_FLOAT])?;
            w.write_all(&v.to_le_bytes())
        }
        TreeValue::Str(v) => {
            w.write_all(&[TAG_STRING])?;
            write_blob(w, v.as_bytes())
        }
        TreeValue::Bytes(v) => {
            w.write_all(&[TAG_BYTES])?;
            write_blob(w, v)
        }
        TreeValue::List(_) => w.write_all(&[TAG_EMPTY_LIST]),
        TreeValue::Map(_) => w.write_all(&[TAG_EMPTY_MAP]),
    }
}

fn write_blob<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "value too large"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(bytes)
}

/// The envelope used for float arrays in metric responses: little-endian
/// 8-byte floats under a `numpy` marker.
pub fn numpy_f64(values: &[f64]) -> TreeValue {
    let mut blob = Vec::with_capacity(values.len() * 8);
    for value in values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    TreeValue::map([
        ("type", TreeValue::from("numpy")),
        ("dtype", TreeValue::from("float64")),
        ("shape", TreeValue::Int(values.len() as i64)),
        ("blob", TreeValue::Bytes(blob)),
    ])
}

/// Decode a stream of records back into (path, leaf) pairs. Used by tests
/// and diagnostic tooling; fails on a record truncated mid-way.
pub fn decode_tree(mut input: &[u8]) -> io::Result<Vec<(Vec<String>, TreeValue)>> {
    let mut leaves = Vec::new();
    while !input.is_empty() {
        let mut count_buf = [0u8; 2];
        input.read_exact(&mut count_buf)?;
        let count = u16::from_le_bytes(count_buf);

        let mut path = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let blob = read_blob(&mut input)?;
            path.push(String::from_utf8(blob).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("bad path component: {e}"))
            })?);
        }

        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        let leaf = match tag[0] {
            TAG_NONE => TreeValue::Null,
            TAG_BOOL => {
                let mut b = [0u8; 1];
                input.read_exact(&mut b)?;
                TreeValue::Bool(b[0] != 0)
            }
            TAG_INT => {
                let mut b = [0u8; 8];
                input.read_exact(&mut b)?;
                TreeValue::Int(i64::from_le_bytes(b))
            }
            TAG_FLOAT => {
                let mut b = [0u8; 8];
                input.read_exact(&mut b)?;
                TreeValue::Float(f64::from_le_bytes(b))
            }
            TAG_STRING => {
                let blob = read_blob(&mut input)?;
                TreeValue::Str(String::from_utf8(blob).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad string: {e}"))
                })?)
            }
            TAG_BYTES => TreeValue::Bytes(read_blob(&mut input)?),
            TAG_EMPTY_LIST => TreeValue::List(Vec::new()),
            TAG_EMPTY_MAP => TreeValue::Map(Vec::new()),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown value tag {other}"),
                ));
            }
        };
        leaves.push((path, leaf));
    }
    Ok(leaves)
}

fn read_blob(input: &mut &[u8]) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if input.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated record",
        ));
    }
    let (blob, rest) = input.split_at(len);
    let blob = blob.to_vec();
    *input = rest;
    Ok(blob)
}
