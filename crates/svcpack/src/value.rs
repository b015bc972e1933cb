//! Self-describing values used as call arguments, results and properties.

use std::collections::BTreeMap;

use crate::Error;
use crate::Result;
use crate::wire::Reader;
use crate::wire::Writer;

/// Deepest nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 32;

const TAG_UNIT: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_LIST: u8 = 0x10;
const TAG_MAP: u8 = 0x11;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.write(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Decodes exactly one value; trailing bytes are an error.
    pub fn decode(buf: &[u8]) -> Result<Value> {
        let mut r = Reader::new(buf);
        let value = Value::read(&mut r)?;
        r.finish()?;
        Ok(value)
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        match self {
            Value::Unit => w.u8(TAG_UNIT),
            Value::Bool(b) => {
                w.u8(TAG_BOOL);
                w.bool(*b);
            }
            Value::Int(i) => {
                w.u8(TAG_INT);
                w.i64(*i);
            }
            Value::Float(v) => {
                w.u8(TAG_FLOAT);
                w.f64(*v);
            }
            Value::Str(s) => {
                w.u8(TAG_STR);
                w.str(s)?;
            }
            Value::Bytes(b) => {
                w.u8(TAG_BYTES);
                w.bytes(b)?;
            }
            Value::List(items) => {
                w.u8(TAG_LIST);
                w.count(items.len())?;
                for item in items {
                    item.write(w)?;
                }
            }
            Value::Map(entries) => {
                w.u8(TAG_MAP);
                w.count(entries.len())?;
                for (key, value) in entries {
                    w.str(key)?;
                    value.write(w)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Value> {
        Self::read_nested(r, 0)
    }

    fn read_nested(r: &mut Reader<'_>, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        let tag = r.u8()?;
        let value = match tag {
            TAG_UNIT => Value::Unit,
            TAG_BOOL => Value::Bool(r.bool()?),
            TAG_INT => Value::Int(r.i64()?),
            TAG_FLOAT => Value::Float(r.f64()?),
            TAG_STR => Value::Str(r.str()?.to_string()),
            TAG_BYTES => Value::Bytes(r.bytes()?.to_vec()),
            TAG_LIST => {
                let n = r.count()?;
                // Each item takes at least one byte.
                if n > r.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(Self::read_nested(r, depth + 1)?);
                }
                Value::List(items)
            }
            TAG_MAP => {
                let n = r.count()?;
                if n > r.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut entries = BTreeMap::new();
                for _ in 0..n {
                    let key = r.str()?.to_string();
                    entries.insert(key, Self::read_nested(r, depth + 1)?);
                }
                Value::Map(entries)
            }
            other => return Err(Error::InvalidTag(other)),
        };
        Ok(value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Str(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::Str(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::List(v) }
}
