//! # Service Manager
//!
//! Client-side entry point: resolves descriptors through the registry and
//! opens remote objects at the location they advertise.

use std::sync::Arc;

use svcdb::RegistryEvent;
use svcdb::ServiceRegistry;
use svcmeta::Descriptor;
use svcmeta::Filter;
use svcmeta::Scope;
use svcmeta::ServiceType;
use svcpack::EntryKey;
use svcrpc::Bus;
use svcrpc::ConnectOptions;
use svcrpc::RemoteObject;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] svcdb::Error),
    #[error(transparent)]
    Endpoint(#[from] svcrpc::Error),
    #[error("{0} is not a valid descriptor")]
    InvalidDescriptor(String),
    /// Plugins are loaded in-process by the host, not over the bus.
    #[error("{0} is a plugin and cannot be reached over the bus")]
    NotInterProcess(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The protocol identity of a registered implementation.
pub fn entry_key(descriptor: &Descriptor) -> EntryKey {
    EntryKey::new(
        descriptor.service_name(),
        descriptor.interface_name(),
        descriptor.version().to_string(),
    )
}

pub struct ServiceManager {
    registry: Arc<ServiceRegistry>,
    bus: Arc<dyn Bus>,
    scope: Scope,
    options: ConnectOptions,
}

impl ServiceManager {
    /// Lookups in `scope`. The User scope also sees System defaults.
    pub fn new(registry: Arc<ServiceRegistry>, bus: Arc<dyn Bus>, scope: Scope) -> Self {
        Self { registry, bus, scope, options: ConnectOptions::default() }
    }

    /// Like [`ServiceManager::new`], with request timeout and connect
    /// retries taken from `config`.
    pub fn from_config(registry: Arc<ServiceRegistry>, bus: Arc<dyn Bus>, scope: Scope, config: &Config) -> Self {
        Self::new(registry, bus, scope).with_connect_options(config.connect_options())
    }

    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn find(&self, filter: &Filter) -> Result<Vec<Descriptor>> {
        Ok(self.registry.find(filter, self.scope)?)
    }

    pub fn interface_default(&self, interface: &str) -> Result<Descriptor> {
        Ok(self.registry.interface_default(interface, self.scope)?)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Connects to the implementation `descriptor` names and creates an
    /// object of it.
    pub async fn load(&self, descriptor: &Descriptor) -> Result<RemoteObject> {
        if !descriptor.is_valid() || descriptor.location().is_empty() {
            return Err(Error::InvalidDescriptor(descriptor.to_string()));
        }
        if descriptor.service_type() != ServiceType::InterProcess {
            return Err(Error::NotInterProcess(descriptor.to_string()));
        }

        debug!(%descriptor, location = descriptor.location(), "loading service");
        let object = RemoteObject::connect(
            self.bus.as_ref(),
            entry_key(descriptor),
            descriptor.location(),
            self.options.clone(),
        )
        .await?;
        Ok(object)
    }

    /// Loads the default implementation of `interface`.
    pub async fn load_interface(&self, interface: &str) -> Result<RemoteObject> {
        let descriptor = self.interface_default(interface)?;
        self.load(&descriptor).await
    }
}
