//! # Publisher
//!
//! Makes the entries of an [`InstanceManager`] reachable on a [`Bus`]. Every
//! distinct interface is bound at `Address::new(interface, ident)`, and each
//! accepted connection gets its own serve task.
//!
//! ## Connection protocol
//!
//! 1. The security filter sees the connection credentials first. A rejected
//!    connection has its first request answered `Failed` with no payload
//!    ("not accepted") and is closed.
//! 2. `Authenticate` succeeds when the service needs no token or the
//!    presented token is in the grant map.
//! 3. `ObjectCreation` is checked against the session grants, then served by
//!    the instance manager.
//! 4. Method and property calls are dispatched to objects this connection
//!    created. `InstanceClose` releases one of them and is never answered.
//! 5. On disconnect every instance the connection still holds is released.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use svcpack::CallError;
use svcpack::CallErrorKind;
use svcpack::EntryKey;
use svcpack::InstanceId;
use svcpack::Invocation;
use svcpack::Package;
use svcpack::PackageKind;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::channel::Address;
use crate::channel::Bus;
use crate::channel::Channel;
use crate::channel::Credentials;
use crate::endpoint::EndpointState;
use crate::endpoint::Result;
use crate::instance::Entry;
use crate::instance::InstanceEvent;
use crate::instance::InstanceManager;
use crate::instance::InstancePolicy;
use crate::instance::ServiceObject;
use crate::security::Grant;
use crate::security::SecuritySession;

/// Decides from the transport credentials whether a connection is served.
pub type SecurityFilter = Arc<dyn Fn(&Credentials) -> bool + Send + Sync>;

struct ServeContext {
    instances: Arc<InstanceManager>,
    filter: Option<SecurityFilter>,
    grants: HashMap<String, Grant>,
    quit_on_last_instance_closed: bool,
    quit: Arc<watch::Sender<bool>>,
}

impl ServeContext {
    fn request_quit(&self) {
        info!("requesting quit");
        self.quit.send_replace(true);
    }
}

pub struct Publisher {
    bus: Arc<dyn Bus>,
    instances: Arc<InstanceManager>,
    keys: Vec<EntryKey>,
    filter: Option<SecurityFilter>,
    grants: HashMap<String, Grant>,
    quit_on_last_instance_closed: bool,
    state: watch::Sender<EndpointState>,
    quit: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn Bus>, instances: Arc<InstanceManager>) -> Self {
        let (state, _) = watch::channel(EndpointState::Idle);
        let (quit, _) = watch::channel(false);
        Self {
            bus,
            instances,
            keys: Vec::new(),
            filter: None,
            grants: HashMap::new(),
            quit_on_last_instance_closed: false,
            state,
            quit: Arc::new(quit),
            tasks: Vec::new(),
        }
    }

    /// Registers a constructible type. Returns `false` if the key is taken.
    pub fn create_entry<F>(&mut self, key: EntryKey, policy: InstancePolicy, factory: F) -> bool
    where
        F: Fn(&Credentials) -> std::result::Result<Arc<dyn ServiceObject>, String> + Send + Sync + 'static,
    {
        let added = self.instances.add_type(Entry::new(key.clone(), policy, factory));
        if added {
            self.keys.push(key);
        }
        added
    }

    pub fn set_security_filter<F>(&mut self, filter: F)
    where
        F: Fn(&Credentials) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
    }

    /// Requires clients to present one of these tokens before creating
    /// objects. An empty map serves everyone.
    pub fn set_grants(&mut self, grants: HashMap<String, Grant>) {
        self.grants = grants;
    }

    pub fn set_quit_on_last_instance_closed(&mut self, enabled: bool) {
        self.quit_on_last_instance_closed = enabled;
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    pub fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EndpointState> {
        self.state.subscribe()
    }

    /// Becomes `true` once the service should exit.
    pub fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit.subscribe()
    }

    /// Binds one listener per distinct interface and starts serving.
    /// Nothing stays bound if any address fails.
    pub async fn publish(&mut self, ident: &str) -> Result<Vec<Address>> {
        let addresses: BTreeSet<Address> = self.keys.iter().map(|k| Address::new(&k.interface, ident)).collect();

        let mut listeners = Vec::with_capacity(addresses.len());
        for address in &addresses {
            listeners.push(self.bus.bind(address).await?);
        }

        let ctx = Arc::new(ServeContext {
            instances: self.instances.clone(),
            filter: self.filter.clone(),
            grants: self.grants.clone(),
            quit_on_last_instance_closed: self.quit_on_last_instance_closed,
            quit: self.quit.clone(),
        });

        for listener in listeners {
            info!(address = %listener.address(), "publishing");
            let ctx = ctx.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(channel) = listener.accept().await {
                    tokio::spawn(serve(ctx.clone(), channel));
                }
                debug!(address = %listener.address(), "listener shut down");
            }));
        }

        if self.quit_on_last_instance_closed {
            let mut events = self.instances.subscribe();
            let ctx = ctx.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event == InstanceEvent::AllInstancesClosed {
                        ctx.request_quit();
                    }
                }
            }));
        }

        self.state.send_replace(EndpointState::Publishing);
        Ok(addresses.into_iter().collect())
    }

    /// Stops accepting connections and unbinds every address. Connections
    /// already being served run until their clients leave.
    pub fn shutdown(&mut self) {
        self.state.send_replace(EndpointState::Closing);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state.send_replace(EndpointState::Closed);
        info!("publisher shut down");
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve(ctx: Arc<ServeContext>, channel: Box<dyn Channel>) {
    let credentials = channel.credentials().clone();

    if let Some(filter) = &ctx.filter {
        if !filter(&credentials) {
            warn!(?credentials, "connection rejected by security filter");
            reject(channel.as_ref()).await;
            if ctx.quit_on_last_instance_closed && ctx.instances.total_instances() == 0 {
                ctx.request_quit();
            }
            return;
        }
    }

    debug!(?credentials, "serving connection");
    let mut conn = Connection {
        ctx: &ctx,
        credentials,
        session: SecuritySession::service(ctx.grants.clone()),
        owned: HashMap::new(),
    };

    loop {
        let bytes = match channel.recv().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "connection failed");
                break;
            }
        };

        let package = match Package::decode(&bytes) {
            Ok(package) => package,
            Err(e) => {
                warn!(error = %e, "dropping undecodable package");
                continue;
            }
        };

        if package.is_response() {
            warn!(message_id = package.message_id, "protocol violation: client sent a response");
            break;
        }

        let Some(reply) = conn.handle(package) else {
            continue;
        };
        let sent = match reply.encode() {
            Ok(bytes) => channel.send(&bytes).await.is_ok(),
            Err(e) => {
                warn!(error = %e, "could not encode reply");
                true
            }
        };
        if !sent {
            break;
        }
    }

    channel.close().await;
    conn.release_all();
    debug!("connection closed");
}

/// Answers the first request "not accepted" and hangs up.
async fn reject(channel: &dyn Channel) {
    if let Ok(Some(bytes)) = channel.recv().await {
        let reply = Package::decode(&bytes)
            .ok()
            .filter(|p| !p.is_response() && p.kind.expects_response())
            .and_then(|p| p.create_response().ok())
            .and_then(|r| r.encode().ok());
        if let Some(reply) = reply {
            let _ = channel.send(&reply).await;
        }
    }
    channel.close().await;
}

/// Per-connection state of the serve loop.
struct Connection<'a> {
    ctx: &'a ServeContext,
    credentials: Credentials,
    session: SecuritySession,
    /// References this connection holds, by instance.
    owned: HashMap<(EntryKey, InstanceId), usize>,
}

impl Connection<'_> {
    fn handle(&mut self, package: Package) -> Option<Package> {
        debug!(kind = ?package.kind, message_id = package.message_id, entry = %package.entry, "request");
        let response = match package.create_response() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "cannot answer package");
                return None;
            }
        };

        match package.kind {
            PackageKind::Authenticate => Some(self.authenticate(&package, response)),
            PackageKind::ObjectCreation => Some(self.create(&package, response)),
            PackageKind::MethodCall | PackageKind::PropertyCall => Some(self.dispatch(&package, response)),
            PackageKind::InstanceClose => {
                self.release(&package.entry, package.instance_id);
                None
            }
        }
    }

    fn authenticate(&mut self, package: &Package, response: Package) -> Package {
        let accepted = !self.session.needs_token()
            || std::str::from_utf8(&package.payload).is_ok_and(|token| self.session.is_token_valid(token));
        if accepted {
            response.succeed(Vec::new())
        } else {
            warn!(credentials = ?self.credentials, "token rejected");
            response
        }
    }

    fn create(&mut self, package: &Package, mut response: Package) -> Package {
        if !self.session.is_authorized(PackageKind::ObjectCreation, &package.entry) {
            warn!(entry = %package.entry, "object creation not authorized");
            return response;
        }

        match self.ctx.instances.create_instance(&package.entry, &self.credentials) {
            Ok((id, _)) => {
                *self.owned.entry((package.entry.clone(), id)).or_insert(0) += 1;
                response.instance_id = id;
                response.succeed(Vec::new())
            }
            Err(e) => {
                warn!(error = %e, "object creation failed");
                fail(response, CallError::failed(e.to_string()))
            }
        }
    }

    fn dispatch(&self, package: &Package, response: Package) -> Package {
        let key = (package.entry.clone(), package.instance_id);
        let object = if self.owned.contains_key(&key) {
            self.ctx.instances.object(&package.entry, package.instance_id)
        } else {
            None
        };
        let Some(object) = object else {
            let message = format!("{} is not open on this connection", package.instance_id);
            return fail(response, CallError::new(CallErrorKind::NoSuchInstance, message));
        };

        let call = match Invocation::decode(&package.payload) {
            Ok(call) if call.kind() == package.kind => call,
            Ok(call) => {
                let message = format!("`{}` sent in a {:?} package", call.name(), package.kind);
                return fail(response, CallError::invalid_arguments(message));
            }
            Err(e) => return fail(response, CallError::invalid_arguments(format!("malformed invocation: {e}"))),
        };

        match object.invoke(call).and_then(|v| v.encode().map_err(|e| CallError::failed(e.to_string()))) {
            Ok(payload) => response.succeed(payload),
            Err(e) => fail(response, e),
        }
    }

    fn release(&mut self, entry: &EntryKey, id: InstanceId) {
        let key = (entry.clone(), id);
        let Some(count) = self.owned.get_mut(&key) else {
            debug!(instance = %id, "ignoring close of an instance this connection does not hold");
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.owned.remove(&key);
        }
        if let Err(e) = self.ctx.instances.close_instance(entry, id) {
            warn!(error = %e, "closing instance failed");
        }
    }

    fn release_all(&mut self) {
        for ((entry, id), count) in self.owned.drain() {
            for _ in 0..count {
                if let Err(e) = self.ctx.instances.close_instance(&entry, id) {
                    warn!(error = %e, "releasing instance failed");
                }
            }
        }
    }
}

fn fail(response: Package, error: CallError) -> Package {
    response.fail(error.encode().unwrap_or_default())
}
