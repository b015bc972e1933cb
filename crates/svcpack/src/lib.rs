//! # Svcpack
//!
//! The envelope exchanged between a client and a published service, plus the
//! typed call payloads it carries.
//!
//! ## Philosophy
//!
//! - **Fixed header, opaque body**: routing never looks inside `payload`.
//! - **Typed calls**: methods and properties travel as [`Invocation`] values
//!   over a small self-describing [`Value`] model, not as reflected names
//!   resolved at runtime.
//! - **Bounded decoding**: every read is length checked and nesting is capped.
//!
//! ## Format
//!
//! ```text
//! [b"SVPK"][validity: 1b][kind: 1b][response: 1b]
//! [message id: u64][instance id: u64]
//! [service: str][interface: str][version: str]
//! [payload: u32 len + bytes]
//! ```
//!
//! A validity byte of `0` marks a null package: nothing follows it. Strings
//! are `u32` length prefixed UTF-8. All integers are Little-Endian.

pub mod call;
pub mod package;
pub mod value;
pub mod wire;

pub use call::CallError;
pub use call::CallErrorKind;
pub use call::Invocation;
pub use package::EntryKey;
pub use package::InstanceId;
pub use package::Package;
pub use package::PackageKind;
pub use package::ResponseType;
pub use value::Value;


/// Svcpack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The buffer does not start with the package format tag.
    BadFormatTag([u8; 4]),
    /// The validity byte marks a null package.
    NullPackage,
    /// The validity byte is neither valid nor null.
    InvalidValidity(u8),
    /// Byte does not name a `PackageKind`.
    InvalidKind(u8),
    /// Byte does not name a `ResponseType`.
    InvalidResponse(u8),
    /// Byte does not name a value, invocation or error tag.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Bytes left over after a complete item.
    TrailingBytes(usize),
    /// Blob length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Values nested deeper than `value::MAX_DEPTH`.
    TooDeep,
    /// `create_response` called on a package that is already a response.
    AlreadyResponse,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadFormatTag(tag) => write!(f, "bad package format tag {:02x?}", tag),
            Error::NullPackage => write!(f, "null package"),
            Error::InvalidValidity(b) => write!(f, "invalid validity byte {:#04x}", b),
            Error::InvalidKind(b) => write!(f, "invalid package kind {:#04x}", b),
            Error::InvalidResponse(b) => write!(f, "invalid response type {:#04x}", b),
            Error::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after item", n),
            Error::AlreadyResponse => write!(f, "package is already a response"),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for svcpack operations.
pub type Result<T> = std::result::Result<T, Error>;
