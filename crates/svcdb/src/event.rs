use svcmeta::Scope;

/// Committed registry change, sent to every subscriber in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    ServiceAdded { name: String, scope: Scope },
    ServiceRemoved { name: String, scope: Scope },
}

impl RegistryEvent {
    pub fn service_name(&self) -> &str {
        match self {
            RegistryEvent::ServiceAdded { name, .. } | RegistryEvent::ServiceRemoved { name, .. } => name,
        }
    }
}
