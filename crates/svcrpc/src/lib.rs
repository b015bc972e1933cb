//! # Svcrpc
//!
//! The remote object protocol: services publish entries on a [`Bus`],
//! clients connect, authenticate, create objects and call them.
//!
//! ## Philosophy
//!
//! - **Transport is injected**: everything runs against the [`Channel`],
//!   [`Listener`] and [`Bus`] traits. [`LocalBus`] serves one process.
//! - **Faults are not call failures**: a [`CallError`](svcpack::CallError)
//!   leaves the connection usable, a [`Fault`] ends it.
//! - **Explicit ownership**: the [`InstanceManager`] is constructed by the
//!   host and shared by handle, never reached through a global.
//!
//! ## Invariants
//!
//! - Object creation is gated by the [`SecuritySession`]; nothing else is.
//! - A disconnect fails every pending request and releases every instance
//!   the connection created on the service side.

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod instance;
pub mod local;
pub mod proxy;
pub mod publisher;
pub mod security;

pub use channel::Address;
pub use channel::Bus;
pub use channel::Channel;
pub use channel::Credentials;
pub use channel::Listener;
pub use client::Client;
pub use client::ConnectOptions;
pub use endpoint::EndpointState;
pub use endpoint::Error;
pub use endpoint::Fault;
pub use endpoint::Launcher;
pub use endpoint::Result;
pub use instance::Entry;
pub use instance::InstanceEvent;
pub use instance::InstanceManager;
pub use instance::InstancePolicy;
pub use instance::ServiceObject;
pub use local::DuplexChannel;
pub use local::LocalBus;
pub use proxy::RemoteObject;
pub use publisher::Publisher;
pub use publisher::SecurityFilter;
pub use security::Grant;
pub use security::Role;
pub use security::SecuritySession;
