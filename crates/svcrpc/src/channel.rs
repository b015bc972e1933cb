//! # Channel Abstraction
//!
//! A minimal, async interface for moving packages between processes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A channel knows nothing about packages or instances.
//!   It moves opaque buffers, in order.
//! - **Disconnect is data**: `recv` returning `Ok(None)` is the normal way a
//!   peer going away is observed.
//! - **Transport-agnostic addressing**: services are found by [`Address`],
//!   whatever carries the bytes.

use std::fmt;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// Nothing is listening at the address.
    #[error("no listener at {0}")]
    NoListener(Address),
    /// Another listener already owns the address.
    #[error("address {0} is already bound")]
    AddressInUse(Address),
    /// Generic I/O error or internal transport failure.
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Canonical service address: the interface name with `.` turned into `/`,
/// followed by the publishing process identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn new(interface: &str, ident: &str) -> Self {
        Self(format!("{}/{}", interface.replace('.', "/"), ident))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the process on the other end of a channel, as reported by
/// the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Credentials {
    pub process_id: u32,
    pub user_id: u32,
    pub label: String,
}

impl Credentials {
    /// The placeholder for "no credentials available".
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(process_id: u32, user_id: u32) -> Self {
        Self { process_id, user_id, label: String::new() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Credentials of the calling process. The user id is left at `0`
    /// because it has no portable source.
    pub fn current() -> Self {
        Self::new(std::process::id(), 0)
    }

    pub fn is_none(&self) -> bool {
        self == &Self::none()
    }
}

/// An ordered, bidirectional byte channel.
///
/// This trait is designed to be object-safe (`Arc<dyn Channel>`).
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Sends one buffer to the peer.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next buffer. `Ok(None)` means the peer disconnected.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Credentials of the remote end.
    fn credentials(&self) -> &Credentials;

    /// Stops sending. The peer observes a disconnect.
    async fn close(&self);
}

/// Accepts incoming channels at one address.
#[async_trait::async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Waits for the next connection. `None` once the listener is shut down.
    async fn accept(&self) -> Option<Box<dyn Channel>>;

    fn address(&self) -> &Address;
}

/// The transport namespace: where services listen and clients connect.
#[async_trait::async_trait]
pub trait Bus: Send + Sync + 'static {
    async fn bind(&self, address: &Address) -> Result<Box<dyn Listener>>;

    /// Opens a channel to `address`, presenting `credentials` to the listener.
    async fn connect(&self, address: &Address, credentials: Credentials) -> Result<Box<dyn Channel>>;
}
