//! # Client Connection with Async Pump
//!
//! A [`Client`] owns one channel to a published service. A background pump
//! reads every incoming package and routes responses to the waiting request
//! by `message_id`.
//!
//! ## Invariants
//!
//! - Every request gets a fresh `message_id`; ids are scoped to one channel.
//! - Responses nobody waits for are dropped.
//! - Object creation is serialized per connection.
//! - When the pump stops, the state becomes `Closed` and every pending
//!   request fails with `Fault::Disconnected`.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use svcpack::CallError;
use svcpack::EntryKey;
use svcpack::Package;
use svcpack::PackageKind;
use svcpack::ResponseType;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::channel;
use crate::channel::Address;
use crate::channel::Bus;
use crate::channel::Channel;
use crate::channel::Credentials;
use crate::endpoint::EndpointState;
use crate::endpoint::Error;
use crate::endpoint::Fault;
use crate::endpoint::Launcher;
use crate::endpoint::Result;
use crate::proxy::RemoteObject;
use crate::security::SecuritySession;

type Pending = DashMap<u64, oneshot::Sender<Result<Package>>>;

/// How a client reaches and authenticates with a service.
#[derive(Clone)]
pub struct ConnectOptions {
    pub credentials: Credentials,
    pub token: Option<String>,
    /// Upper bound on every awaited response.
    pub timeout: Duration,
    /// Starts the service when nothing listens at its address.
    pub launcher: Option<Arc<dyn Launcher>>,
    /// Connection attempts made after a launch.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            credentials: Credentials::current(),
            token: None,
            timeout: Duration::from_secs(30),
            launcher: None,
            retries: 20,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl ConnectOptions {
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// An authenticated connection to one service address.
pub struct Client {
    entry: EntryKey,
    address: Address,
    channel: Arc<dyn Channel>,
    pending: Arc<Pending>,
    next_message_id: AtomicU64,
    creation: tokio::sync::Mutex<()>,
    state: Arc<watch::Sender<EndpointState>>,
    session: parking_lot::Mutex<SecuritySession>,
    timeout: Duration,
    pump: JoinHandle<()>,
}

impl Client {
    /// Connects to the service publishing `entry` at `location` and runs the
    /// token handshake. Fails with [`Error::NotAccepted`] when the service
    /// rejects the connection or the token.
    pub async fn connect(bus: &dyn Bus, entry: EntryKey, location: &str, options: ConnectOptions) -> Result<Arc<Client>> {
        if entry.interface.is_empty() {
            return Err(Error::IncompleteEntry(entry.to_string()));
        }
        let address = Address::new(&entry.interface, location);
        let (state, _) = watch::channel(EndpointState::Connecting);
        let state = Arc::new(state);

        let channel: Arc<dyn Channel> = Arc::from(open_channel(bus, &address, &options).await?);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let pump = tokio::spawn(pump(channel.clone(), pending.clone(), state.clone()));

        let client = Arc::new(Client {
            entry,
            address,
            channel,
            pending,
            next_message_id: AtomicU64::new(1),
            creation: tokio::sync::Mutex::new(()),
            state,
            session: parking_lot::Mutex::new(SecuritySession::client(options.token.clone())),
            timeout: options.timeout,
            pump,
        });

        client.authenticate().await?;
        info!(address = %client.address, "connected");
        Ok(client)
    }

    pub fn entry(&self) -> &EntryKey {
        &self.entry
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EndpointState> {
        self.state.subscribe()
    }

    /// Creates a new object of this connection's entry on the service.
    pub async fn create_object(self: &Arc<Self>) -> Result<RemoteObject> {
        let _creating = self.creation.lock().await;

        let authorized = self.session.lock().is_authorized(PackageKind::ObjectCreation, &self.entry);
        if !authorized {
            return Err(Error::NotAccepted);
        }

        let response = self.request(Package::request(PackageKind::ObjectCreation, self.entry.clone())).await?;
        match response.response {
            ResponseType::Success => {
                debug!(entry = %self.entry, instance = %response.instance_id, "object created");
                Ok(RemoteObject::new(self.clone(), response.instance_id))
            }
            _ if response.payload.is_empty() => Err(Error::NotAccepted),
            _ => Err(Error::CallFailed(CallError::decode(&response.payload)?)),
        }
    }

    /// Sends `package` as a request and waits for its response.
    pub async fn request(&self, mut package: Package) -> Result<Package> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        package.message_id = message_id;
        let bytes = package.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id, tx);

        // The pump flips the state before draining, so a request inserted
        // after the drain sees it here.
        if self.state().is_closed() {
            self.pending.remove(&message_id);
            return Err(Fault::Disconnected.into());
        }

        if let Err(e) = self.channel.send(&bytes).await {
            self.pending.remove(&message_id);
            return Err(transport_fault(e).into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&message_id);
                Err(Fault::Disconnected.into())
            }
            Err(_) => {
                self.pending.remove(&message_id);
                Err(Error::Timeout)
            }
        }
    }

    /// Sends `package` without waiting for anything back.
    pub async fn notify(&self, mut package: Package) -> Result<()> {
        if self.state().is_closed() {
            return Err(Fault::Disconnected.into());
        }
        package.message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let bytes = package.encode()?;
        self.channel.send(&bytes).await.map_err(|e| transport_fault(e).into())
    }

    /// Closes the channel. Pending requests fail with `Fault::Disconnected`.
    pub async fn close(&self) {
        if self.state().is_closed() {
            return;
        }
        self.state.send_replace(EndpointState::Closing);
        self.channel.close().await;
        self.pump.abort();
        self.state.send_replace(EndpointState::Closed);
        notify_all_pending(&self.pending);
        info!(address = %self.address, "connection closed");
    }

    async fn authenticate(&self) -> Result<()> {
        self.state.send_replace(EndpointState::Authenticating);
        let package = self.session.lock().authenticate_package(self.entry.clone());

        let response = match self.request(package).await {
            Ok(response) => response,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };

        if response.response != ResponseType::Success {
            warn!(address = %self.address, "service did not accept the connection");
            self.close().await;
            return Err(Error::NotAccepted);
        }

        self.session.lock().accept();
        self.state.send_replace(EndpointState::Ready);
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Connects to `address`, launching the service once if nothing listens.
async fn open_channel(bus: &dyn Bus, address: &Address, options: &ConnectOptions) -> Result<Box<dyn Channel>> {
    match bus.connect(address, options.credentials.clone()).await {
        Ok(channel) => return Ok(channel),
        Err(channel::Error::NoListener(_)) if options.launcher.is_some() => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(launcher) = &options.launcher {
        info!(%address, "no listener, launching service");
        launcher
            .launch(address)
            .await
            .map_err(|e| Error::Fault(Fault::Transport(format!("launch failed: {e}"))))?;
    }

    let mut last = channel::Error::NoListener(address.clone());
    for attempt in 0..options.retries {
        tokio::time::sleep(options.retry_delay).await;
        match bus.connect(address, options.credentials.clone()).await {
            Ok(channel) => return Ok(channel),
            Err(e @ channel::Error::NoListener(_)) => {
                debug!(%address, attempt, "service not up yet");
                last = e;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last.into())
}

async fn pump(channel: Arc<dyn Channel>, pending: Arc<Pending>, state: Arc<watch::Sender<EndpointState>>) {
    let fault = loop {
        match channel.recv().await {
            Ok(Some(bytes)) => match Package::decode(&bytes) {
                Ok(package) if package.is_response() => match pending.remove(&package.message_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(Ok(package));
                    }
                    None => debug!(message_id = package.message_id, "dropping unmatched response"),
                },
                Ok(package) => break Fault::Protocol(format!("service sent a {:?} request", package.kind)),
                Err(e) => warn!(error = %e, "dropping undecodable package"),
            },
            Ok(None) => break Fault::Disconnected,
            Err(e) => break transport_fault(e),
        }
    };

    if fault != Fault::Disconnected {
        warn!(%fault, "connection torn down");
        channel.close().await;
    }
    state.send_replace(EndpointState::Closed);
    notify_all_pending(&pending);
}

fn notify_all_pending(pending: &Pending) {
    let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(Fault::Disconnected.into()));
        }
    }
}

fn transport_fault(e: channel::Error) -> Fault {
    match e {
        channel::Error::ConnectionLost(_) => Fault::Disconnected,
        other => Fault::Transport(other.to_string()),
    }
}
