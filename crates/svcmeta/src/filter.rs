//! # Descriptor Filters
//!
//! A [`Filter`] is a conjunction of optional constraints. An unset axis is a
//! wildcard; it never means "match the empty value".
//!
//! Matching order mirrors the registry query: service name, interface name,
//! version, capabilities, then custom attributes.

use std::collections::BTreeMap;

use crate::descriptor::Descriptor;
use crate::version::Version;

/// How a requested version is compared against a descriptor's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMatch {
    /// `(major, minor)` must be numerically equal.
    Exact,
    /// `(major, minor)` must be greater than or equal, major first.
    #[default]
    Minimum,
}

/// How the filter's capability set relates to a descriptor's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapabilityMatch {
    /// The descriptor must declare at least every capability in the filter.
    /// An empty filter set therefore matches everything.
    #[default]
    MatchMinimum,
    /// Every capability the descriptor declares must be in the filter set,
    /// i.e. the caller already holds everything needed to load it. An empty
    /// filter set only matches descriptors that declare no capabilities.
    MatchLoadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InterfaceConstraint {
    name: String,
    version: String,
    rule: VersionMatch,
}

/// Query predicate over descriptors.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    service_name: Option<String>,
    interface: Option<InterfaceConstraint>,
    capability_match: CapabilityMatch,
    capabilities: Vec<String>,
    custom_attributes: BTreeMap<String, String>,
}

impl Filter {
    /// A filter that matches every descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts matches to one service. An empty name clears the constraint.
    pub fn service(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.service_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Restricts matches to one interface, any version.
    pub fn interface(self, name: impl Into<String>) -> Self {
        self.interface_version(name, "", VersionMatch::Minimum)
    }

    /// Restricts matches to one interface and a version rule.
    ///
    /// A version string that does not parse as `major.minor` places no
    /// constraint on the version.
    pub fn interface_version(mut self, name: impl Into<String>, version: &str, rule: VersionMatch) -> Self {
        let name = name.into();
        self.interface = (!name.is_empty()).then(|| InterfaceConstraint {
            name,
            version: version.to_string(),
            rule,
        });
        self
    }

    pub fn capabilities<I, S>(mut self, rule: CapabilityMatch, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_match = rule;
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Requires `key` to be present with exactly `value`. The empty string is
    /// a value like any other.
    pub fn custom_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_ref().map(|c| c.name.as_str())
    }

    /// The parsed version constraint, or `None` when the version is a wildcard.
    pub fn version_constraint(&self) -> Option<(Version, VersionMatch)> {
        let constraint = self.interface.as_ref()?;
        Version::parse(&constraint.version).map(|v| (v, constraint.rule))
    }

    pub fn capability_match(&self) -> CapabilityMatch {
        self.capability_match
    }

    pub fn required_capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn custom_attributes(&self) -> &BTreeMap<String, String> {
        &self.custom_attributes
    }

    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        if let Some(service) = &self.service_name {
            if !crate::names_equal(service, descriptor.service_name()) {
                return false;
            }
        }

        if let Some(interface) = &self.interface {
            if !crate::names_equal(&interface.name, descriptor.interface_name()) {
                return false;
            }
        }

        if let Some((version, rule)) = self.version_constraint() {
            let matched = match rule {
                VersionMatch::Exact => descriptor.version() == version,
                VersionMatch::Minimum => descriptor.version() >= version,
            };
            if !matched {
                return false;
            }
        }

        let declared = descriptor.capabilities();
        let capabilities_ok = match self.capability_match {
            CapabilityMatch::MatchLoadable => declared.iter().all(|c| self.capabilities.contains(c)),
            CapabilityMatch::MatchMinimum => self.capabilities.iter().all(|c| declared.contains(c)),
        };
        if !capabilities_ok {
            return false;
        }

        self.custom_attributes
            .iter()
            .all(|(key, value)| descriptor.custom_attribute(key) == Some(value.as_str()))
    }
}
