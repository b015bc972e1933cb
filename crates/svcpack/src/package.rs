//! # Package
//!
//! The unit of exchange on a connection. A request carries a fresh
//! `message_id`; its response echoes that id and the `instance_id`, so the
//! client can pair them regardless of arrival order.

use std::fmt;

use crate::Error;
use crate::Result;
use crate::wire::Reader;
use crate::wire::Writer;

/// Leading bytes of every encoded package.
pub const FORMAT_TAG: [u8; 4] = *b"SVPK";
/// Validity byte of a package that carries a header and payload.
pub const VALID: u8 = 1;
/// Validity byte of a null package: tag and flag only, nothing follows.
pub const NULL: u8 = 0;

/// Identifier of a live instance on the serving side. `0` means "none yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub const NONE: InstanceId = InstanceId(0);
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// The registered type a package is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EntryKey {
    pub service: String,
    pub interface: String,
    pub version: String,
}

impl EntryKey {
    pub fn new(service: impl Into<String>, interface: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            interface: interface.into(),
            version: version.into(),
        }
    }

    /// True when every field is non-empty.
    pub fn is_complete(&self) -> bool {
        !self.service.is_empty() && !self.interface.is_empty() && !self.version.is_empty()
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.interface, self.version)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    ObjectCreation = 0x01,
    MethodCall = 0x02,
    PropertyCall = 0x03,
    /// Client token check. `Success` means the token was accepted.
    Authenticate = 0x04,
    /// One-way close notification; never answered.
    InstanceClose = 0x05,
}

impl PackageKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PackageKind::ObjectCreation),
            0x02 => Some(PackageKind::MethodCall),
            0x03 => Some(PackageKind::PropertyCall),
            0x04 => Some(PackageKind::Authenticate),
            0x05 => Some(PackageKind::InstanceClose),
            _ => None,
        }
    }

    /// Whether the receiver must answer this kind of request.
    pub fn expects_response(&self) -> bool {
        !matches!(self, PackageKind::InstanceClose)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseType {
    #[default]
    NotAResponse = 0x00,
    Success = 0x01,
    Failed = 0x02,
}

impl ResponseType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(ResponseType::NotAResponse),
            0x01 => Some(ResponseType::Success),
            0x02 => Some(ResponseType::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageKind,
    pub response: ResponseType,
    pub message_id: u64,
    pub instance_id: InstanceId,
    pub entry: EntryKey,
    pub payload: Vec<u8>,
}

impl Package {
    /// A request of `kind` addressed to `entry`, with no instance and no payload.
    pub fn request(kind: PackageKind, entry: EntryKey) -> Self {
        Self {
            kind,
            response: ResponseType::NotAResponse,
            message_id: 0,
            instance_id: InstanceId::NONE,
            entry,
            payload: Vec::new(),
        }
    }

    pub fn with_instance(mut self, id: InstanceId) -> Self {
        self.instance_id = id;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_response(&self) -> bool {
        self.response != ResponseType::NotAResponse
    }

    /// Builds the answer to this request.
    ///
    /// The response starts out `Failed` with an empty payload; the handler
    /// flips it to `Success` once the work is done.
    pub fn create_response(&self) -> Result<Package> {
        if self.is_response() {
            return Err(Error::AlreadyResponse);
        }
        Ok(Package {
            kind: self.kind,
            response: ResponseType::Failed,
            message_id: self.message_id,
            instance_id: self.instance_id,
            entry: self.entry.clone(),
            payload: Vec::new(),
        })
    }

    /// Marks a response successful and attaches `payload`.
    pub fn succeed(mut self, payload: Vec<u8>) -> Self {
        self.response = ResponseType::Success;
        self.payload = payload;
        self
    }

    /// Marks a response failed and attaches `payload`.
    pub fn fail(mut self, payload: Vec<u8>) -> Self {
        self.response = ResponseType::Failed;
        self.payload = payload;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.raw(&FORMAT_TAG);
        w.u8(VALID);
        w.u8(self.kind as u8);
        w.u8(self.response as u8);
        w.u64(self.message_id);
        w.u64(self.instance_id.0);
        w.str(&self.entry.service)?;
        w.str(&self.entry.interface)?;
        w.str(&self.entry.version)?;
        w.bytes(&self.payload)?;
        Ok(w.into_bytes())
    }

    /// The encoding of a null package, sent by peers that have nothing
    /// valid to say. Decoding it yields [`Error::NullPackage`].
    pub fn encode_null() -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(&FORMAT_TAG);
        w.u8(NULL);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Package> {
        let mut r = Reader::new(buf);

        let tag = r.raw(FORMAT_TAG.len()).map_err(|_| Error::BadFormatTag(prefix(buf)))?;
        if tag != FORMAT_TAG {
            return Err(Error::BadFormatTag(prefix(buf)));
        }

        match r.u8()? {
            VALID => {}
            NULL => return Err(Error::NullPackage),
            other => return Err(Error::InvalidValidity(other)),
        }

        let kind = r.u8()?;
        let kind = PackageKind::from_u8(kind).ok_or(Error::InvalidKind(kind))?;
        let response = r.u8()?;
        let response = ResponseType::from_u8(response).ok_or(Error::InvalidResponse(response))?;
        let message_id = r.u64()?;
        let instance_id = InstanceId(r.u64()?);
        let entry = EntryKey {
            service: r.str()?.to_string(),
            interface: r.str()?.to_string(),
            version: r.str()?.to_string(),
        };
        let payload = r.bytes()?.to_vec();
        r.finish()?;

        Ok(Package { kind, response, message_id, instance_id, entry, payload })
    }
}

fn prefix(buf: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    let n = buf.len().min(4);
    out[..n].copy_from_slice(&buf[..n]);
    out
}
