//! Shared endpoint vocabulary: lifecycle states, errors, and the launcher
//! hook used to auto-start services.

use std::fmt;

use svcpack::CallError;

use crate::channel;
use crate::channel::Address;
use crate::instance;

/// Lifecycle of a publishing or connecting endpoint.
///
/// A publisher moves `Idle -> Publishing -> Closing -> Closed`. A client
/// moves `Idle -> Connecting -> Authenticating -> Ready -> Closing -> Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    Idle,
    Publishing,
    Connecting,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

impl EndpointState {
    pub fn is_closed(&self) -> bool {
        matches!(self, EndpointState::Closing | EndpointState::Closed)
    }
}

/// A failure of the connection itself, as opposed to a call on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The peer went away or the connection was closed.
    Disconnected,
    /// The peer sent something the protocol does not allow.
    Protocol(String),
    /// The transport reported an error.
    Transport(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Disconnected => write!(f, "disconnected"),
            Fault::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Fault::Transport(msg) => write!(f, "transport failure: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] channel::Error),
    #[error("connection fault: {0}")]
    Fault(Fault),
    /// The call reached the service and failed there.
    #[error("call failed: {0}")]
    CallFailed(CallError),
    /// The service refused the connection or the object creation.
    #[error("not accepted")]
    NotAccepted,
    #[error("request timed out")]
    Timeout,
    #[error("codec error: {0}")]
    Codec(#[from] svcpack::Error),
    #[error(transparent)]
    Instance(#[from] instance::Error),
    #[error("entry {0} has no interface name")]
    IncompleteEntry(String),
}

impl Error {
    /// True for failures that tear the connection down.
    pub fn is_fault(&self) -> bool {
        matches!(self, Error::Fault(_))
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Fault(fault)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Starts the process that will publish `address`, when nothing listens
/// there yet. Returning `Ok` does not mean the service is up; the client
/// retries the connection afterwards.
#[async_trait::async_trait]
pub trait Launcher: Send + Sync + 'static {
    async fn launch(&self, address: &Address) -> std::result::Result<(), String>;
}
