//! String-only wire form of a descriptor, used for persistence and export.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::descriptor::Descriptor;
use crate::descriptor::Scope;
use crate::descriptor::ServiceType;

pub const ATTR_CAPABILITIES: &str = "capabilities";
pub const ATTR_LOCATION: &str = "location";
pub const ATTR_SERVICE_TYPE: &str = "service_type";
pub const ATTR_SERVICE_DESCRIPTION: &str = "service_description";
pub const ATTR_INTERFACE_DESCRIPTION: &str = "interface_description";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("record field `{field}` is invalid: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A descriptor flattened to strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub service_name: String,
    pub interface_name: String,
    pub major: String,
    pub minor: String,
    pub scope: String,
    pub attributes: BTreeMap<String, String>,
    pub custom_attributes: BTreeMap<String, String>,
}

impl From<&Descriptor> for DescriptorRecord {
    fn from(d: &Descriptor) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_CAPABILITIES.to_string(), d.capabilities().join(","));
        attributes.insert(ATTR_LOCATION.to_string(), d.location().to_string());
        attributes.insert(ATTR_SERVICE_TYPE.to_string(), d.service_type().as_tag().to_string());
        attributes.insert(ATTR_SERVICE_DESCRIPTION.to_string(), d.service_description().to_string());
        attributes.insert(ATTR_INTERFACE_DESCRIPTION.to_string(), d.interface_description().to_string());

        Self {
            service_name: d.service_name().to_string(),
            interface_name: d.interface_name().to_string(),
            major: d.major_version().to_string(),
            minor: d.minor_version().to_string(),
            scope: d.scope().as_tag().to_string(),
            attributes,
            custom_attributes: d.custom_attributes().clone(),
        }
    }
}

impl TryFrom<DescriptorRecord> for Descriptor {
    type Error = Error;

    fn try_from(record: DescriptorRecord) -> Result<Self> {
        let major = parse_int("major", &record.major)?;
        let minor = parse_int("minor", &record.minor)?;
        let scope = Scope::from_tag(&record.scope).ok_or_else(|| Error::InvalidField {
            field: "scope",
            value: record.scope.clone(),
        })?;

        let attr = |key: &str| record.attributes.get(key).cloned().unwrap_or_default();
        let service_type = match record.attributes.get(ATTR_SERVICE_TYPE) {
            None => ServiceType::default(),
            Some(tag) => ServiceType::from_tag(tag).ok_or_else(|| Error::InvalidField {
                field: ATTR_SERVICE_TYPE,
                value: tag.clone(),
            })?,
        };

        let capabilities = attr(ATTR_CAPABILITIES);
        let capabilities = capabilities.split(',').filter(|c| !c.is_empty());

        let mut builder = Descriptor::builder(record.service_name.clone(), record.interface_name.clone())
            .version(major, minor)
            .scope(scope)
            .location(attr(ATTR_LOCATION))
            .service_type(service_type)
            .capabilities(capabilities)
            .service_description(attr(ATTR_SERVICE_DESCRIPTION))
            .interface_description(attr(ATTR_INTERFACE_DESCRIPTION));

        for (key, value) in record.custom_attributes {
            builder = builder.custom_attribute(key, value);
        }

        Ok(builder.build())
    }
}

fn parse_int(field: &'static str, value: &str) -> Result<i32> {
    value.parse().map_err(|_| Error::InvalidField {
        field,
        value: value.to_string(),
    })
}
