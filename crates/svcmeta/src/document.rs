//! # Service Description Documents
//!
//! Validates the TOML document a service ships to describe itself and turns
//! it into descriptors ready for registration. The parser only validates and
//! reports; reading files is the caller's business.
//!
//! ```toml
//! version = "1.1"
//!
//! [service]
//! name = "Acme"
//! ipcaddress = "acme_service"      # or: filepath = "libacme.so"
//! description = "Acme system services"
//!
//! [[interface]]
//! name = "com.acme.sysinfo"
//! version = "2.3"
//! description = "System information"
//! capabilities = ["ReadUserData"]
//!
//! [interface.attributes]
//! vendor = "acme"
//! ```
//!
//! `ipcaddress` requires document version 1.1 or later.

use std::collections::BTreeMap;

use toml::Table;
use toml::Value;

use crate::descriptor::Descriptor;
use crate::descriptor::Scope;
use crate::descriptor::ServiceType;
use crate::version::Version;

/// Oldest document version understood by the parser.
pub const MIN_DOCUMENT_VERSION: Version = Version::new(1, 0);
/// Newest document version understood by the parser.
pub const MAX_DOCUMENT_VERSION: Version = Version::new(1, 1);
/// First document version that may declare an IPC address.
pub const IPC_DOCUMENT_VERSION: Version = Version::new(1, 1);

const KNOWN_ROOT_KEYS: &[&str] = &["version", "service", "interface"];

pub type Result<T> = std::result::Result<T, Error>;

/// Structured document failures; each names the offending part.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("document is not valid TOML: {0}")]
    Syntax(String),
    #[error("unsupported document version {0:?}")]
    UnsupportedDocumentVersion(String),
    #[error("missing [service] table")]
    MissingService,
    #[error("service name is missing or empty")]
    MissingServiceName,
    #[error("service declares neither `filepath` nor `ipcaddress`")]
    MissingLocation,
    #[error("service declares both `filepath` and `ipcaddress`")]
    MultipleLocations,
    #[error("`ipcaddress` requires document version 1.1 or later")]
    UnsupportedIpc,
    #[error("service declares no [[interface]] entries")]
    MissingInterfaces,
    #[error("interface name is missing or empty")]
    MissingInterfaceName,
    #[error("interface `{interface}` has no version")]
    MissingInterfaceVersion { interface: String },
    #[error("interface `{interface}` has malformed version {version:?}")]
    InvalidVersion { interface: String, version: String },
    #[error("interface `{interface}` version {version} is declared twice")]
    DuplicateInterface { interface: String, version: Version },
    #[error("interface `{interface}` declares a custom attribute with an empty key")]
    InvalidCustomAttribute { interface: String },
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// One `[[interface]]` entry after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMetadata {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub capabilities: Vec<String>,
    pub custom_attributes: BTreeMap<String, String>,
}

/// A validated service description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub name: String,
    pub location: String,
    pub service_type: ServiceType,
    pub description: String,
    pub interfaces: Vec<InterfaceMetadata>,
    /// Non-fatal findings such as unknown keys.
    pub warnings: Vec<String>,
}

impl ServiceMetadata {
    pub fn parse_bytes(input: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(input).map_err(|e| Error::Syntax(e.to_string()))?;
        Self::parse_str(text)
    }

    pub fn parse_str(input: &str) -> Result<Self> {
        let root: Table = toml::from_str(input).map_err(|e| Error::Syntax(e.to_string()))?;

        let mut warnings = Vec::new();
        for key in root.keys() {
            if !KNOWN_ROOT_KEYS.contains(&key.as_str()) {
                warnings.push(format!("unknown key `{key}`"));
            }
        }

        let doc_version = match root.get("version") {
            None => MIN_DOCUMENT_VERSION,
            Some(Value::String(raw)) => Version::parse(raw)
                .filter(|v| (MIN_DOCUMENT_VERSION..=MAX_DOCUMENT_VERSION).contains(v))
                .ok_or_else(|| Error::UnsupportedDocumentVersion(raw.clone()))?,
            Some(_) => return Err(Error::InvalidField { field: "version", reason: "expected string".into() }),
        };

        let service = match root.get("service") {
            Some(Value::Table(table)) => table,
            Some(_) => return Err(Error::InvalidField { field: "service", reason: "expected table".into() }),
            None => return Err(Error::MissingService),
        };

        let name = optional_string(service, "name")?.unwrap_or_default().trim().to_string();
        if name.is_empty() {
            return Err(Error::MissingServiceName);
        }
        let description = optional_string(service, "description")?.unwrap_or_default();

        let filepath = optional_string(service, "filepath")?.filter(|s| !s.trim().is_empty());
        let ipcaddress = optional_string(service, "ipcaddress")?.filter(|s| !s.trim().is_empty());
        let (location, service_type) = match (filepath, ipcaddress) {
            (Some(_), Some(_)) => return Err(Error::MultipleLocations),
            (None, None) => return Err(Error::MissingLocation),
            (Some(path), None) => (path, ServiceType::Plugin),
            (None, Some(address)) => {
                if doc_version < IPC_DOCUMENT_VERSION {
                    return Err(Error::UnsupportedIpc);
                }
                (address, ServiceType::InterProcess)
            }
        };

        let entries = match root.get("interface") {
            None => return Err(Error::MissingInterfaces),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(Error::InvalidField { field: "interface", reason: "expected array of tables".into() }),
        };
        if entries.is_empty() {
            return Err(Error::MissingInterfaces);
        }

        let mut interfaces: Vec<InterfaceMetadata> = Vec::with_capacity(entries.len());
        for entry in entries {
            let table = entry.as_table().ok_or_else(|| Error::InvalidField {
                field: "interface",
                reason: "expected table".into(),
            })?;
            let interface = parse_interface(table)?;

            let duplicate = interfaces
                .iter()
                .any(|i| i.version == interface.version && crate::names_equal(&i.name, &interface.name));
            if duplicate {
                return Err(Error::DuplicateInterface {
                    interface: interface.name,
                    version: interface.version,
                });
            }
            interfaces.push(interface);
        }

        Ok(Self { name, location, service_type, description, interfaces, warnings })
    }

    /// Expands the document into one descriptor per interface in `scope`.
    pub fn descriptors(&self, scope: Scope) -> Vec<Descriptor> {
        self.interfaces
            .iter()
            .map(|i| {
                let mut builder = Descriptor::builder(self.name.clone(), i.name.clone())
                    .with_version(i.version)
                    .scope(scope)
                    .location(self.location.clone())
                    .service_type(self.service_type)
                    .service_description(self.description.clone())
                    .interface_description(i.description.clone())
                    .capabilities(i.capabilities.iter().cloned());
                for (key, value) in &i.custom_attributes {
                    builder = builder.custom_attribute(key.clone(), value.clone());
                }
                builder.build()
            })
            .collect()
    }
}

fn parse_interface(table: &Table) -> Result<InterfaceMetadata> {
    let name = optional_string(table, "name")?.unwrap_or_default().trim().to_string();
    if name.is_empty() {
        return Err(Error::MissingInterfaceName);
    }

    let raw_version = optional_string(table, "version")?
        .ok_or_else(|| Error::MissingInterfaceVersion { interface: name.clone() })?;
    let version = Version::parse(&raw_version).ok_or_else(|| Error::InvalidVersion {
        interface: name.clone(),
        version: raw_version.clone(),
    })?;

    let description = optional_string(table, "description")?.unwrap_or_default();

    let mut capabilities: Vec<String> = Vec::new();
    if let Some(raw) = table.get("capabilities") {
        let items = raw.as_array().ok_or_else(|| Error::InvalidField {
            field: "capabilities",
            reason: "expected array of strings".into(),
        })?;
        for item in items {
            let cap = item
                .as_str()
                .map(str::trim)
                .filter(|c| !c.is_empty() && !c.contains(','))
                .ok_or_else(|| Error::InvalidField {
                    field: "capabilities",
                    reason: "entries must be non-empty strings without commas".into(),
                })?;
            if !capabilities.iter().any(|c| c == cap) {
                capabilities.push(cap.to_string());
            }
        }
    }

    let mut custom_attributes = BTreeMap::new();
    if let Some(raw) = table.get("attributes") {
        let attrs = raw.as_table().ok_or_else(|| Error::InvalidField {
            field: "attributes",
            reason: "expected table".into(),
        })?;
        for (key, value) in attrs {
            if key.trim().is_empty() {
                return Err(Error::InvalidCustomAttribute { interface: name.clone() });
            }
            let value = value.as_str().ok_or_else(|| Error::InvalidField {
                field: "attributes",
                reason: format!("value of `{key}` must be a string"),
            })?;
            custom_attributes.insert(key.clone(), value.to_string());
        }
    }

    Ok(InterfaceMetadata { name, version, description, capabilities, custom_attributes })
}

fn optional_string(table: &Table, field: &'static str) -> Result<Option<String>> {
    match table.get(field) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(Error::InvalidField { field, reason: "expected string".into() }),
    }
}
