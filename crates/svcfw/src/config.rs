//! Framework settings, read from a TOML file.
//!
//! ```toml
//! log_level = "info"
//!
//! [registry]
//! user_path = "/home/me/.local/share/svcfw/services.db"
//! system_path = "/var/lib/svcfw/services.db"
//! busy_timeout_ms = 5000
//! system_read_only = true
//!
//! [endpoint]
//! request_timeout_ms = 30000
//! connect_retries = 20
//! quit_on_last_instance_closed = false
//! ```
//!
//! Every key is optional; missing ones take the defaults below.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use svcdb::Database;
use svcdb::OpenOptions;
use svcdb::ServiceRegistry;
use svcmeta::Scope;
use svcrpc::ConnectOptions;
use svcrpc::Publisher;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
    pub registry: RegistryConfig,
    pub endpoint: EndpointConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub user_path: PathBuf,
    pub system_path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Open the System store read-only, as unprivileged processes do.
    pub system_read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub request_timeout_ms: u64,
    pub connect_retries: u32,
    pub quit_on_last_instance_closed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            registry: RegistryConfig::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            user_path: default_user_path(),
            system_path: PathBuf::from("/var/lib/svcfw/services.db"),
            busy_timeout_ms: 5_000,
            system_read_only: true,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_retries: 20,
            quit_on_last_instance_closed: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&text)
    }

    /// Loads `path` when given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            read_only: false,
            busy_timeout: Duration::from_millis(self.registry.busy_timeout_ms),
        }
    }

    /// Opens both stores. A read-only System store that was never created
    /// is treated as empty.
    pub fn open_registry(&self) -> svcdb::Result<ServiceRegistry> {
        let system = &self.registry.system_path;
        if self.registry.system_read_only && !system.exists() {
            warn!(path = %system.display(), "system registry not found, using an empty one");
            let user = Database::open(&self.registry.user_path, Scope::User, self.open_options())?;
            return ServiceRegistry::new(user, Database::open_in_memory(Scope::System)?);
        }
        ServiceRegistry::open(
            &self.registry.user_path,
            &self.registry.system_path,
            self.open_options(),
            self.registry.system_read_only,
        )
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_millis(self.endpoint.request_timeout_ms),
            retries: self.endpoint.connect_retries,
            ..ConnectOptions::default()
        }
    }

    /// Carries the service-side endpoint settings over to `publisher`.
    /// Call before [`Publisher::publish`].
    pub fn apply_to(&self, publisher: &mut Publisher) {
        publisher.set_quit_on_last_instance_closed(self.endpoint.quit_on_last_instance_closed);
    }
}

fn default_user_path() -> PathBuf {
    let data = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_default();
    data.join("svcfw").join("services.db")
}
