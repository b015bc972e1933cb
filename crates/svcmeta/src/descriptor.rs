//! # Interface Descriptors
//!
//! A [`Descriptor`] names one implementation of one interface: which service
//! provides it, at which version, where it lives and what it requires from
//! the caller.
//!
//! ## Invariants
//!
//! - A descriptor is *valid* iff both names are non-empty and both version
//!   components are non-negative.
//! - Identity (`Eq`/`Hash`) is `(service, interface, major, minor)` with the
//!   names folded to lower case. Every other field is metadata.
//! - Capabilities keep insertion order and never contain duplicates.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use serde::Deserialize;
use serde::Serialize;

use crate::version::Version;

/// Which registry partition a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    User,
    System,
}

impl Scope {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::System => "system",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "user" => Some(Scope::User),
            "system" => Some(Scope::System),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// How the implementation is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Loaded into the caller's process from `location` (a plugin path).
    #[default]
    Plugin,
    /// Hosted by another process reachable at `location` (an IPC address).
    InterProcess,
}

impl ServiceType {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ServiceType::Plugin => "plugin",
            ServiceType::InterProcess => "ipc",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "plugin" => Some(ServiceType::Plugin),
            "ipc" => Some(ServiceType::InterProcess),
            _ => None,
        }
    }
}

/// Identity and metadata for a single interface implementation.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    service_name: String,
    interface_name: String,
    version: Version,
    scope: Scope,
    location: String,
    service_type: ServiceType,
    capabilities: Vec<String>,
    custom_attributes: BTreeMap<String, String>,
    service_description: String,
    interface_description: String,
}

impl Descriptor {
    /// Starts building a descriptor for `interface` provided by `service`.
    pub fn builder(service: impl Into<String>, interface: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            inner: Descriptor {
                service_name: service.into(),
                interface_name: interface.into(),
                ..Descriptor::default()
            },
        }
    }

    /// Returns a builder seeded with every field of this descriptor.
    pub fn to_builder(&self) -> DescriptorBuilder {
        DescriptorBuilder { inner: self.clone() }
    }

    pub fn is_valid(&self) -> bool {
        !self.service_name.is_empty() && !self.interface_name.is_empty() && self.version.is_valid()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn major_version(&self) -> i32 {
        self.version.major
    }

    pub fn minor_version(&self) -> i32 {
        self.version.minor
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn custom_attributes(&self) -> &BTreeMap<String, String> {
        &self.custom_attributes
    }

    pub fn custom_attribute(&self, key: &str) -> Option<&str> {
        self.custom_attributes.get(key).map(String::as_str)
    }

    pub fn service_description(&self) -> &str {
        &self.service_description
    }

    pub fn interface_description(&self) -> &str {
        &self.interface_description
    }

    /// True when every field, not only the identity, matches `other`.
    pub fn same_fields(&self, other: &Descriptor) -> bool {
        self.service_name == other.service_name
            && self.interface_name == other.interface_name
            && self.version == other.version
            && self.scope == other.scope
            && self.location == other.location
            && self.service_type == other.service_type
            && self.capabilities == other.capabilities
            && self.custom_attributes == other.custom_attributes
            && self.service_description == other.service_description
            && self.interface_description == other.interface_description
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && crate::names_equal(&self.service_name, &other.service_name)
            && crate::names_equal(&self.interface_name, &other.interface_name)
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        crate::name_key(&self.service_name).hash(state);
        crate::name_key(&self.interface_name).hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.service_name, self.interface_name, self.version)
    }
}

/// Fluent constructor for [`Descriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    inner: Descriptor,
}

impl DescriptorBuilder {
    pub fn version(mut self, major: i32, minor: i32) -> Self {
        self.inner.version = Version::new(major, minor);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.inner.version = version;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.inner.scope = scope;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.inner.location = location.into();
        self
    }

    pub fn service_type(mut self, service_type: ServiceType) -> Self {
        self.inner.service_type = service_type;
        self
    }

    /// Adds a capability unless it is already present.
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.inner.capabilities.contains(&capability) {
            self.inner.capabilities.push(capability);
        }
        self
    }

    pub fn capabilities<I, S>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        capabilities.into_iter().fold(self, |b, c| b.capability(c))
    }

    pub fn custom_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.custom_attributes.insert(key.into(), value.into());
        self
    }

    pub fn service_description(mut self, description: impl Into<String>) -> Self {
        self.inner.service_description = description.into();
        self
    }

    pub fn interface_description(mut self, description: impl Into<String>) -> Self {
        self.inner.interface_description = description.into();
        self
    }

    pub fn build(self) -> Descriptor {
        self.inner
    }
}
