//! # Service Registry
//!
//! Persistent, queryable storage of interface descriptors.
//!
//! Each [`Database`] holds exactly one [`Scope`](svcmeta::Scope) in its own
//! SQLite file. [`ServiceRegistry`] pairs a User store with a System store and
//! resolves the one cross-scope reference the model allows: a User default
//! pointing at a System implementation.
//!
//! ## Invariants
//!
//! - **Atomic batches**: every mutation runs in one transaction. A failed
//!   `register` leaves no row of its batch behind.
//! - **One implementation per version**: within a scope, an
//!   `(interface, major, minor)` triple belongs to at most one service.
//! - **Defaults**: every interface with a local implementation has a default.
//!   Unless pinned with `set_default`, it is the highest registered version.
//! - **Notifications after commit**: observers never hear about a batch that
//!   was rolled back.

pub mod database;
pub mod error;
pub mod event;
pub mod registry;

pub use database::Database;
pub use database::OpenOptions;
pub use error::Error;
pub use error::Result;
pub use event::RegistryEvent;
pub use registry::ServiceRegistry;

#[cfg(test)]
mod tests;
