//! # Scoped Registry Store
//!
//! One SQLite database per scope. Descriptors are split into a `service` row,
//! one `interface` row per implemented interface version, and string
//! attributes taken from the descriptor's [`DescriptorRecord`] form.
//!
//! The `defaults` table maps an interface name to an interface id. The id is
//! usually local, but a store may also point at an id that lives in the other
//! scope's database; such rows are always pinned (`explicit = 1`) and never
//! recomputed.
//!
//! Name columns use the `NAME` collation, registered on every connection,
//! which folds case with [`svcmeta::name_key`] rather than SQLite's
//! ASCII-only `NOCASE`.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use svcmeta::Descriptor;
use svcmeta::DescriptorRecord;
use svcmeta::Filter;
use svcmeta::Scope;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;
use crate::event::RegistryEvent;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS service (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE COLLATE NAME,
        location TEXT NOT NULL,
        owner TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS interface (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL REFERENCES service(id),
        name TEXT NOT NULL COLLATE NAME,
        major INTEGER NOT NULL,
        minor INTEGER NOT NULL,
        UNIQUE (name, major, minor)
    );
    CREATE TABLE IF NOT EXISTS interface_attribute (
        interface_id TEXT NOT NULL REFERENCES interface(id),
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        custom INTEGER NOT NULL,
        PRIMARY KEY (interface_id, key, custom)
    );
    CREATE TABLE IF NOT EXISTS defaults (
        interface_name TEXT PRIMARY KEY COLLATE NAME,
        interface_id TEXT NOT NULL,
        explicit INTEGER NOT NULL DEFAULT 0
    );
";

/// How a store is opened.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Reject every mutation with [`Error::NoWritePermissions`].
    pub read_only: bool,
    /// Upper bound on waiting for another writer; exceeding it is [`Error::Timeout`].
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Registry store for a single scope.
pub struct Database {
    scope: Scope,
    read_only: bool,
    conn: Mutex<Option<Connection>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RegistryEvent>>>,
}

impl Database {
    /// Opens (creating when writable) the store at `path`.
    pub fn open(path: impl AsRef<Path>, scope: Scope, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let conn = if options.read_only {
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
            }
            Connection::open(path)?
        };
        info!(path = %path.display(), %scope, read_only = options.read_only, "opened registry store");
        Self::with_connection(conn, scope, options)
    }

    pub fn open_in_memory(scope: Scope) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, scope, OpenOptions::default())
    }

    fn with_connection(conn: Connection, scope: Scope, options: OpenOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        // Name columns compare exactly like `svcmeta::names_equal`.
        conn.create_collation("NAME", |a, b| svcmeta::name_key(a).cmp(&svcmeta::name_key(b)))?;
        if !options.read_only {
            conn.execute_batch(SCHEMA)?;
        }
        Ok(Self {
            scope,
            read_only: options.read_only,
            conn: Mutex::new(Some(conn)),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Closes the store. Every later call fails with [`Error::NotOpen`].
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            info!(scope = %self.scope, "closed registry store");
        }
    }

    /// Returns a channel receiving every committed change to this store.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(tx);
        rx
    }

    /// Adds an existing sender to the subscriber list.
    pub fn attach(&self, sender: mpsc::UnboundedSender<RegistryEvent>) {
        self.subscribers.lock().push(sender);
    }

    /// Registers a batch of descriptors atomically.
    ///
    /// `owner` is recorded per service; an empty token leaves the service
    /// removable by anyone.
    pub fn register(&self, descriptors: &[Descriptor], owner: &str) -> Result<()> {
        if descriptors.is_empty() {
            return Err(Error::InvalidDescriptor("empty batch".into()));
        }
        for d in descriptors {
            if !d.is_valid() {
                return Err(Error::InvalidDescriptor(format!("{d} is incomplete")));
            }
            if d.scope() != self.scope {
                return Err(Error::InvalidDescriptor(format!("{d} belongs to the {} scope", d.scope())));
            }
        }

        self.write(|tx, events| {
            let mut services: Vec<(String, String)> = Vec::new();
            let mut touched: Vec<String> = Vec::new();

            for d in descriptors {
                let existing = services
                    .iter()
                    .find(|(name, _)| svcmeta::names_equal(name, d.service_name()))
                    .map(|(_, id)| id.clone());
                let service_id = match existing {
                    Some(id) => id,
                    None => {
                        let id = insert_service(tx, d, owner)?;
                        services.push((d.service_name().to_string(), id.clone()));
                        events.push(RegistryEvent::ServiceAdded {
                            name: d.service_name().to_string(),
                            scope: self.scope,
                        });
                        id
                    }
                };

                insert_interface(tx, &service_id, d)?;
                if !touched.iter().any(|n| svcmeta::names_equal(n, d.interface_name())) {
                    touched.push(d.interface_name().to_string());
                }
            }

            for name in &touched {
                refresh_default(tx, name, &[])?;
            }
            debug!(scope = %self.scope, count = descriptors.len(), "registered descriptors");
            Ok(())
        })
    }

    /// Removes a service and every interface it implements.
    pub fn unregister(&self, service: &str, owner: &str) -> Result<()> {
        self.write(|tx, events| {
            let (service_id, stored_name, stored_owner): (String, String, String) = tx
                .query_row("SELECT id, name, owner FROM service WHERE name = ?1", [service], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })
                .optional()?
                .ok_or(Error::NotFound)?;

            if !stored_owner.is_empty() && stored_owner != owner {
                return Err(Error::NoWritePermissions);
            }

            let interfaces: Vec<(String, String)> = {
                let mut stmt = tx.prepare("SELECT id, name FROM interface WHERE service_id = ?1 ORDER BY rowid")?;
                let rows = stmt.query_map([&service_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            tx.execute(
                "DELETE FROM interface_attribute WHERE interface_id IN (SELECT id FROM interface WHERE service_id = ?1)",
                [&service_id],
            )?;
            tx.execute("DELETE FROM interface WHERE service_id = ?1", [&service_id])?;
            tx.execute("DELETE FROM service WHERE id = ?1", [&service_id])?;

            let removed: Vec<String> = interfaces.iter().map(|(id, _)| id.clone()).collect();
            let mut refreshed: Vec<&str> = Vec::new();
            for (_, name) in &interfaces {
                if !refreshed.iter().any(|n| svcmeta::names_equal(n, name)) {
                    refresh_default(tx, name, &removed)?;
                    refreshed.push(name);
                }
            }

            debug!(scope = %self.scope, service = %stored_name, "unregistered service");
            events.push(RegistryEvent::ServiceRemoved { name: stored_name, scope: self.scope });
            Ok(())
        })
    }

    /// Returns every descriptor matching `filter`, in registration order.
    pub fn find(&self, filter: &Filter) -> Result<Vec<Descriptor>> {
        self.read(|conn| {
            let mut sql = String::from("SELECT i.id FROM interface i JOIN service s ON s.id = i.service_id WHERE 1 = 1");
            let mut args: Vec<&str> = Vec::new();
            if let Some(service) = filter.service_name() {
                args.push(service);
                sql.push_str(&format!(" AND s.name = ?{}", args.len()));
            }
            if let Some(interface) = filter.interface_name() {
                args.push(interface);
                sql.push_str(&format!(" AND i.name = ?{}", args.len()));
            }
            sql.push_str(" ORDER BY s.rowid, i.rowid");

            let ids: Vec<String> = {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(args.iter()), |r| r.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut found = Vec::new();
            for id in ids {
                if let Some(d) = load_descriptor(conn, self.scope, &id)? {
                    if filter.matches(&d) {
                        found.push(d);
                    }
                }
            }
            Ok(found)
        })
    }

    /// Distinct service names, optionally restricted to implementers of `interface`.
    pub fn services(&self, interface: Option<&str>) -> Result<Vec<String>> {
        self.read(|conn| {
            let names = match interface {
                None => {
                    let mut stmt = conn.prepare("SELECT name FROM service ORDER BY rowid")?;
                    let rows = stmt.query_map([], |r| r.get(0))?;
                    rows.collect::<rusqlite::Result<Vec<String>>>()?
                }
                Some(interface) => {
                    let mut stmt = conn.prepare(
                        "SELECT s.name FROM service s WHERE EXISTS \
                         (SELECT 1 FROM interface i WHERE i.service_id = s.id AND i.name = ?1) \
                         ORDER BY s.rowid",
                    )?;
                    let rows = stmt.query_map([interface], |r| r.get(0))?;
                    rows.collect::<rusqlite::Result<Vec<String>>>()?
                }
            };
            Ok(names)
        })
    }

    /// The default implementation of `interface` stored in this scope.
    ///
    /// A default that references the other scope is reported as
    /// [`Error::NotFound`] here; [`crate::ServiceRegistry`] resolves it.
    pub fn interface_default(&self, interface: &str) -> Result<Descriptor> {
        self.read(|conn| {
            let id = default_id(conn, interface)?.ok_or(Error::NotFound)?;
            load_descriptor(conn, self.scope, &id)?.ok_or(Error::NotFound)
        })
    }

    /// The raw interface id recorded as default for `interface`, local or foreign.
    pub fn default_reference(&self, interface: &str) -> Result<Option<String>> {
        self.read(|conn| default_id(conn, interface))
    }

    /// Pins `descriptor` as its interface's default.
    pub fn set_default(&self, descriptor: &Descriptor) -> Result<()> {
        if descriptor.scope() != self.scope {
            return Err(Error::InvalidDescriptor(format!("{descriptor} belongs to the {} scope", descriptor.scope())));
        }
        self.write(|tx, _| {
            let id = lookup_id(tx, descriptor)?.ok_or(Error::NotFound)?;
            pin_default(tx, descriptor.interface_name(), &id)
        })
    }

    /// Pins the highest version of `interface` provided by `service`.
    pub fn set_default_by_name(&self, service: &str, interface: &str) -> Result<()> {
        self.write(|tx, _| {
            let id = highest_of_service(tx, service, interface)?.ok_or(Error::NotFound)?;
            pin_default(tx, interface, &id)
        })
    }

    /// Records a default that points at an interface id stored in the other scope.
    pub fn set_foreign_default(&self, interface: &str, id: &str) -> Result<()> {
        self.write(|tx, _| {
            if is_local(tx, id)? {
                return Err(Error::InvalidDescriptor(format!("interface id {id} is local")));
            }
            pin_default(tx, interface, id)
        })
    }

    /// Removes every default that points at the foreign id `id`.
    ///
    /// Interfaces left without a default fall back to their highest local
    /// implementation, if any.
    pub fn remove_foreign_default(&self, id: &str) -> Result<()> {
        self.write(|tx, _| {
            if is_local(tx, id)? {
                return Err(Error::InvalidDescriptor(format!("interface id {id} is local")));
            }
            let names: Vec<String> = {
                let mut stmt = tx.prepare("SELECT interface_name FROM defaults WHERE interface_id = ?1")?;
                let rows = stmt.query_map([id], |r| r.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            if names.is_empty() {
                return Err(Error::NotFound);
            }
            tx.execute("DELETE FROM defaults WHERE interface_id = ?1", [id])?;
            for name in &names {
                refresh_default(tx, name, &[])?;
            }
            Ok(())
        })
    }

    /// The interface id under which `descriptor` is stored.
    pub fn descriptor_id(&self, descriptor: &Descriptor) -> Result<String> {
        self.read(|conn| lookup_id(conn, descriptor)?.ok_or(Error::NotFound))
    }

    /// The interface id of the highest version of `interface` from `service`.
    pub fn implementation_id(&self, service: &str, interface: &str) -> Result<String> {
        self.read(|conn| highest_of_service(conn, service, interface)?.ok_or(Error::NotFound))
    }

    pub fn descriptor_by_id(&self, id: &str) -> Result<Option<Descriptor>> {
        self.read(|conn| load_descriptor(conn, self.scope, id))
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotOpen)?;
        f(conn)
    }

    /// Runs `f` in an immediate transaction. Events collected by `f` are sent
    /// only after commit, while the connection is still held.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>, &mut Vec<RegistryEvent>) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(Error::NotOpen)?;
        if self.read_only {
            return Err(Error::NoWritePermissions);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut events = Vec::new();
        let value = f(&tx, &mut events)?;
        tx.commit()?;

        if !events.is_empty() {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| events.iter().all(|e| s.send(e.clone()).is_ok()));
        }
        Ok(value)
    }
}

fn insert_service(tx: &Transaction<'_>, d: &Descriptor, owner: &str) -> Result<String> {
    let taken: bool = tx
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM service WHERE name = ?1 OR (location <> '' AND location = ?2))",
            params![d.service_name(), d.location()],
            |r| r.get(0),
        )?;
    if taken {
        return Err(Error::LocationAlreadyRegistered { service: d.service_name().to_string() });
    }

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO service (id, name, location, owner) VALUES (?1, ?2, ?3, ?4)",
        params![id, d.service_name(), d.location(), owner],
    )?;
    Ok(id)
}

fn insert_interface(tx: &Transaction<'_>, service_id: &str, d: &Descriptor) -> Result<()> {
    let taken: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM interface WHERE name = ?1 AND major = ?2 AND minor = ?3)",
        params![d.interface_name(), d.major_version(), d.minor_version()],
        |r| r.get(0),
    )?;
    if taken {
        return Err(Error::IfaceImplAlreadyRegistered {
            interface: d.interface_name().to_string(),
            version: d.version(),
        });
    }

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO interface (id, service_id, name, major, minor) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, service_id, d.interface_name(), d.major_version(), d.minor_version()],
    )?;

    let record = DescriptorRecord::from(d);
    let mut stmt =
        tx.prepare("INSERT INTO interface_attribute (interface_id, key, value, custom) VALUES (?1, ?2, ?3, ?4)")?;
    for (key, value) in &record.attributes {
        stmt.execute(params![id, key, value, false])?;
    }
    for (key, value) in &record.custom_attributes {
        stmt.execute(params![id, key, value, true])?;
    }
    Ok(())
}

fn load_descriptor(conn: &Connection, scope: Scope, id: &str) -> Result<Option<Descriptor>> {
    let head: Option<(String, String, i32, i32)> = conn
        .query_row(
            "SELECT s.name, i.name, i.major, i.minor FROM interface i JOIN service s ON s.id = i.service_id WHERE i.id = ?1",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((service_name, interface_name, major, minor)) = head else {
        return Ok(None);
    };

    let mut record = DescriptorRecord {
        service_name,
        interface_name,
        major: major.to_string(),
        minor: minor.to_string(),
        scope: scope.as_tag().to_string(),
        ..DescriptorRecord::default()
    };

    let mut stmt = conn.prepare("SELECT key, value, custom FROM interface_attribute WHERE interface_id = ?1")?;
    let rows = stmt.query_map([id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, bool>(2)?)))?;
    for row in rows {
        let (key, value, custom) = row?;
        if custom {
            record.custom_attributes.insert(key, value);
        } else {
            record.attributes.insert(key, value);
        }
    }

    Descriptor::try_from(record).map(Some).map_err(|e| Error::Storage(e.to_string()))
}

fn lookup_id(conn: &Connection, d: &Descriptor) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT i.id FROM interface i JOIN service s ON s.id = i.service_id \
             WHERE s.name = ?1 AND i.name = ?2 AND i.major = ?3 AND i.minor = ?4",
            params![d.service_name(), d.interface_name(), d.major_version(), d.minor_version()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn highest_of_service(conn: &Connection, service: &str, interface: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT i.id FROM interface i JOIN service s ON s.id = i.service_id \
             WHERE s.name = ?1 AND i.name = ?2 ORDER BY i.major DESC, i.minor DESC LIMIT 1",
            [service, interface],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn default_id(conn: &Connection, interface: &str) -> Result<Option<String>> {
    let id = conn
        .query_row("SELECT interface_id FROM defaults WHERE interface_name = ?1", [interface], |r| r.get(0))
        .optional()?;
    Ok(id)
}

fn is_local(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.query_row("SELECT EXISTS (SELECT 1 FROM interface WHERE id = ?1)", [id], |r| r.get(0))?)
}

fn pin_default(tx: &Transaction<'_>, interface: &str, id: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO defaults (interface_name, interface_id, explicit) VALUES (?1, ?2, 1) \
         ON CONFLICT (interface_name) DO UPDATE SET interface_id = excluded.interface_id, explicit = 1",
        [interface, id],
    )?;
    debug!(interface, id, "pinned interface default");
    Ok(())
}

/// Recomputes the automatic default for `interface`.
///
/// A pinned default survives unless its target is in `removed`. Otherwise the
/// default becomes the highest local version. No implementation left clears
/// the row.
fn refresh_default(tx: &Transaction<'_>, interface: &str, removed: &[String]) -> Result<()> {
    let current: Option<(String, bool)> = tx
        .query_row(
            "SELECT interface_id, explicit FROM defaults WHERE interface_name = ?1",
            [interface],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((id, true)) = &current {
        if !removed.contains(id) {
            return Ok(());
        }
    }

    let best: Option<String> = tx
        .query_row(
            "SELECT i.id FROM interface i WHERE i.name = ?1 \
             ORDER BY i.major DESC, i.minor DESC, i.rowid ASC LIMIT 1",
            [interface],
            |r| r.get(0),
        )
        .optional()?;

    match best {
        Some(id) => {
            tx.execute(
                "INSERT INTO defaults (interface_name, interface_id, explicit) VALUES (?1, ?2, 0) \
                 ON CONFLICT (interface_name) DO UPDATE SET interface_id = excluded.interface_id, explicit = 0",
                [interface, id.as_str()],
            )?;
        }
        None => {
            tx.execute("DELETE FROM defaults WHERE interface_name = ?1", [interface])?;
        }
    }
    Ok(())
}
