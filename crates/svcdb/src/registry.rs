//! Two-scope registry facade.
//!
//! The User and System stores never see each other's rows. The only link is
//! a User default that names a System interface id; lookups through
//! [`ServiceRegistry::interface_default`] follow it. System lookups never
//! consult the User store.

use std::path::Path;

use svcmeta::Descriptor;
use svcmeta::Filter;
use svcmeta::Scope;
use tokio::sync::mpsc;
use tracing::debug;

use crate::database::Database;
use crate::database::OpenOptions;
use crate::error::Error;
use crate::error::Result;
use crate::event::RegistryEvent;

pub struct ServiceRegistry {
    user: Database,
    system: Database,
}

impl ServiceRegistry {
    pub fn new(user: Database, system: Database) -> Result<Self> {
        if user.scope() != Scope::User || system.scope() != Scope::System {
            return Err(Error::InvalidDescriptor("stores passed in the wrong scopes".into()));
        }
        Ok(Self { user, system })
    }

    /// Opens both stores. The System store is opened read-only when
    /// `system_read_only` is set, which is how unprivileged callers see it.
    pub fn open(
        user_path: impl AsRef<Path>,
        system_path: impl AsRef<Path>,
        options: OpenOptions,
        system_read_only: bool,
    ) -> Result<Self> {
        let user = Database::open(user_path, Scope::User, OpenOptions { read_only: false, ..options.clone() })?;
        let system = Database::open(
            system_path,
            Scope::System,
            OpenOptions { read_only: system_read_only, ..options },
        )?;
        Self::new(user, system)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory(Scope::User)?, Database::open_in_memory(Scope::System)?)
    }

    pub fn store(&self, scope: Scope) -> &Database {
        match scope {
            Scope::User => &self.user,
            Scope::System => &self.system,
        }
    }

    /// Events from both stores on one channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.user.attach(tx.clone());
        self.system.attach(tx);
        rx
    }

    /// Registers a batch into the store named by the descriptors' scope.
    pub fn register(&self, descriptors: &[Descriptor], owner: &str) -> Result<()> {
        let scope = descriptors
            .first()
            .map(Descriptor::scope)
            .ok_or_else(|| Error::InvalidDescriptor("empty batch".into()))?;
        if descriptors.iter().any(|d| d.scope() != scope) {
            return Err(Error::InvalidDescriptor("batch mixes scopes".into()));
        }
        self.store(scope).register(descriptors, owner)
    }

    pub fn unregister(&self, service: &str, scope: Scope, owner: &str) -> Result<()> {
        self.store(scope).unregister(service, owner)
    }

    pub fn find(&self, filter: &Filter, scope: Scope) -> Result<Vec<Descriptor>> {
        self.store(scope).find(filter)
    }

    pub fn services(&self, interface: Option<&str>, scope: Scope) -> Result<Vec<String>> {
        self.store(scope).services(interface)
    }

    /// Resolves the default for `interface` as seen from `scope`.
    pub fn interface_default(&self, interface: &str, scope: Scope) -> Result<Descriptor> {
        let store = self.store(scope);
        let id = store.default_reference(interface)?.ok_or(Error::NotFound)?;
        if let Some(local) = store.descriptor_by_id(&id)? {
            return Ok(local);
        }
        if scope == Scope::System {
            return Err(Error::NotFound);
        }
        if let Some(foreign) = self.system.descriptor_by_id(&id)? {
            return Ok(foreign);
        }

        // The System implementation went away: drop the stale reference so
        // the interface falls back to its highest local implementation.
        debug!(interface, id, "dropping stale foreign default");
        match self.user.remove_foreign_default(&id) {
            Ok(()) | Err(Error::NotFound) => self.user.interface_default(interface),
            Err(Error::NoWritePermissions) => Err(Error::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Pins `descriptor` as the default seen from `scope`.
    ///
    /// From the User scope a System descriptor becomes a foreign default. The
    /// System scope cannot reference User descriptors.
    pub fn set_default(&self, descriptor: &Descriptor, scope: Scope) -> Result<()> {
        match (scope, descriptor.scope()) {
            (Scope::User, Scope::System) => {
                let id = self.system.descriptor_id(descriptor)?;
                self.user.set_foreign_default(descriptor.interface_name(), &id)
            }
            (Scope::System, Scope::User) => Err(Error::InvalidDescriptor(format!(
                "system defaults cannot reference user descriptor {descriptor}"
            ))),
            _ => self.store(scope).set_default(descriptor),
        }
    }

    /// Pins the highest version of `interface` from `service`. From the User
    /// scope, a service found only in the System store is referenced across.
    pub fn set_default_by_name(&self, service: &str, interface: &str, scope: Scope) -> Result<()> {
        match self.store(scope).set_default_by_name(service, interface) {
            Err(Error::NotFound) if scope == Scope::User => {
                let id = self.system.implementation_id(service, interface)?;
                self.user.set_foreign_default(interface, &id)
            }
            other => other,
        }
    }

    pub fn close(&self) {
        self.user.close();
        self.system.close();
    }
}
