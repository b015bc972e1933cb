//! # Svcfw
//!
//! Ties the registry and the remote object protocol together: a
//! [`ServiceManager`] for clients, a [`Config`] for settings shared by every
//! process, and the `svcfw` administration commands.
//!
//! ## Invariants
//!
//! - A descriptor is reached at `Address::new(interface, location)` with the
//!   entry key `(service, interface, "major.minor")`. Publishers use
//!   [`entry_key`] to register entries under the same identity.

pub mod cli;
pub mod config;
pub mod manager;

pub use config::Config;
pub use manager::Error;
pub use manager::Result;
pub use manager::ServiceManager;
pub use manager::entry_key;
