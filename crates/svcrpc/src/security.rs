//! # Security Session
//!
//! Per-connection authorization state. A service session maps tokens to the
//! interfaces they unlock; a client session carries the token it presents.
//!
//! Only object creation is gated. Once an instance exists, calls on it are
//! not re-checked.

use std::collections::HashMap;

use svcpack::EntryKey;
use svcpack::Package;
use svcpack::PackageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Service,
    Client,
}

/// What a token unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    All,
    Interfaces(Vec<String>),
}

impl Grant {
    pub fn interfaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Grant::Interfaces(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, interface: &str) -> bool {
        match self {
            Grant::All => true,
            Grant::Interfaces(names) => names.iter().any(|n| n.eq_ignore_ascii_case(interface)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecuritySession {
    role: Role,
    token: Option<String>,
    grants: HashMap<String, Grant>,
    needs_token: bool,
}

impl SecuritySession {
    /// A serving session. An empty grant map is an open policy: no token is
    /// required and every interface may be created.
    pub fn service(grants: HashMap<String, Grant>) -> Self {
        let needs_token = !grants.is_empty();
        Self { role: Role::Service, token: None, grants, needs_token }
    }

    /// A connecting session presenting `token`. It stays unauthorized until
    /// the service accepts the token.
    pub fn client(token: Option<String>) -> Self {
        Self { role: Role::Client, token, grants: HashMap::new(), needs_token: true }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn needs_token(&self) -> bool {
        self.needs_token
    }

    /// Records that the service accepted this client's token.
    pub fn accept(&mut self) {
        self.needs_token = false;
    }

    /// Whether a package of `kind` addressed to `entry` may proceed.
    pub fn is_authorized(&self, kind: PackageKind, entry: &EntryKey) -> bool {
        if kind != PackageKind::ObjectCreation {
            return true;
        }
        if self.needs_token {
            return false;
        }
        if self.grants.is_empty() {
            return true;
        }
        self.token
            .as_ref()
            .and_then(|t| self.grants.get(t))
            .is_some_and(|g| g.allows(&entry.interface))
    }

    /// Checks a presented token against the grant map, adopting it on success.
    pub fn is_token_valid(&mut self, token: &str) -> bool {
        if !self.grants.contains_key(token) {
            return false;
        }
        self.token = Some(token.to_string());
        self.needs_token = false;
        true
    }

    /// The `Authenticate` request a client sends before creating objects.
    /// The payload is the token's UTF-8 bytes, empty when there is none.
    pub fn authenticate_package(&self, entry: EntryKey) -> Package {
        let payload = self.token.as_deref().map(|t| t.as_bytes().to_vec()).unwrap_or_default();
        Package::request(PackageKind::Authenticate, entry).with_payload(payload)
    }
}
