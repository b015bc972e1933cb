//! Typed call payloads.
//!
//! A `MethodCall` or `PropertyCall` package carries one encoded
//! [`Invocation`]. A `Success` response carries the encoded result [`Value`];
//! a `Failed` response carries an encoded [`CallError`].

use std::fmt;

use crate::Error;
use crate::Result;
use crate::package::PackageKind;
use crate::value::Value;
use crate::wire::Reader;
use crate::wire::Writer;

const TAG_METHOD: u8 = 0x01;
const TAG_GET_PROPERTY: u8 = 0x02;
const TAG_SET_PROPERTY: u8 = 0x03;

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Method { name: String, args: Vec<Value> },
    GetProperty { name: String },
    SetProperty { name: String, value: Value },
}

impl Invocation {
    pub fn method(name: impl Into<String>, args: Vec<Value>) -> Self {
        Invocation::Method { name: name.into(), args }
    }

    pub fn get(name: impl Into<String>) -> Self {
        Invocation::GetProperty { name: name.into() }
    }

    pub fn set(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Invocation::SetProperty { name: name.into(), value: value.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Invocation::Method { name, .. }
            | Invocation::GetProperty { name }
            | Invocation::SetProperty { name, .. } => name,
        }
    }

    /// The package kind this invocation travels in.
    pub fn kind(&self) -> PackageKind {
        match self {
            Invocation::Method { .. } => PackageKind::MethodCall,
            Invocation::GetProperty { .. } | Invocation::SetProperty { .. } => PackageKind::PropertyCall,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        match self {
            Invocation::Method { name, args } => {
                w.u8(TAG_METHOD);
                w.str(name)?;
                w.count(args.len())?;
                for arg in args {
                    arg.write(&mut w)?;
                }
            }
            Invocation::GetProperty { name } => {
                w.u8(TAG_GET_PROPERTY);
                w.str(name)?;
            }
            Invocation::SetProperty { name, value } => {
                w.u8(TAG_SET_PROPERTY);
                w.str(name)?;
                value.write(&mut w)?;
            }
        }
        Ok(w.into_bytes())
    }

    pub fn decode(buf: &[u8]) -> Result<Invocation> {
        let mut r = Reader::new(buf);
        let tag = r.u8()?;
        let name = r.str()?.to_string();
        let invocation = match tag {
            TAG_METHOD => {
                let n = r.count()?;
                if n > r.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut args = Vec::with_capacity(n);
                for _ in 0..n {
                    args.push(Value::read(&mut r)?);
                }
                Invocation::Method { name, args }
            }
            TAG_GET_PROPERTY => Invocation::GetProperty { name },
            TAG_SET_PROPERTY => Invocation::SetProperty { name, value: Value::read(&mut r)? },
            other => return Err(Error::InvalidTag(other)),
        };
        r.finish()?;
        Ok(invocation)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    NoSuchMethod = 0x01,
    NoSuchProperty = 0x02,
    InvalidArguments = 0x03,
    /// The call reached the object and the object reported a failure.
    Failed = 0x04,
    /// The addressed instance does not exist on the serving side.
    NoSuchInstance = 0x05,
}

impl CallErrorKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(CallErrorKind::NoSuchMethod),
            0x02 => Some(CallErrorKind::NoSuchProperty),
            0x03 => Some(CallErrorKind::InvalidArguments),
            0x04 => Some(CallErrorKind::Failed),
            0x05 => Some(CallErrorKind::NoSuchInstance),
            _ => None,
        }
    }
}

/// An ordinary call failure reported by the serving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn no_such_method(name: &str) -> Self {
        Self::new(CallErrorKind::NoSuchMethod, format!("no method `{name}`"))
    }

    pub fn no_such_property(name: &str) -> Self {
        Self::new(CallErrorKind::NoSuchProperty, format!("no property `{name}`"))
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::InvalidArguments, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Failed, message)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.u8(self.kind as u8);
        w.str(&self.message)?;
        Ok(w.into_bytes())
    }

    pub fn decode(buf: &[u8]) -> Result<CallError> {
        let mut r = Reader::new(buf);
        let kind = r.u8()?;
        let kind = CallErrorKind::from_u8(kind).ok_or(Error::InvalidTag(kind))?;
        let message = r.str()?.to_string();
        r.finish()?;
        Ok(CallError { kind, message })
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallError {}
