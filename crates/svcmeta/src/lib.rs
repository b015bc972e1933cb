//! # Service Metadata
//!
//! Value types shared by every layer of the service framework: the
//! [`Descriptor`] that identifies one interface implementation, the
//! [`Filter`] used to query a registry, and the validated form of a
//! service description document.
//!
//! ## Philosophy
//!
//! - **Immutable values**: descriptors are assembled through a builder and never
//!   change afterwards. Registries hand out clones.
//! - **Case-insensitive identity**: service and interface names compare without
//!   regard to case, everywhere.
//! - **No I/O**: parsing works on strings and byte slices so it can be driven
//!   directly from tests.

pub mod descriptor;
pub mod document;
pub mod filter;
pub mod record;
pub mod version;

pub use descriptor::Descriptor;
pub use descriptor::DescriptorBuilder;
pub use descriptor::Scope;
pub use descriptor::ServiceType;
pub use document::ServiceMetadata;
pub use filter::CapabilityMatch;
pub use filter::Filter;
pub use filter::VersionMatch;
pub use record::DescriptorRecord;
pub use version::Version;

#[cfg(test)]
mod tests;

/// The case-folded form under which a service or interface name is compared,
/// hashed and stored.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Compares two identity keys the way the registry does.
pub fn names_equal(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}
