//! # Remote Object Proxy
//!
//! A handle to one instance living on the service side. Calls are sent as
//! [`Invocation`]s over the owning [`Client`] and answered with a [`Value`]
//! or a [`CallError`].
//!
//! ## Invariants
//!
//! - `Error::CallFailed` means the service ran (or refused) the call; the
//!   connection is still usable. `Error::Fault` means the connection is gone.
//! - An instance is closed at most once, either by `close()` or on drop.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use svcpack::CallError;
use svcpack::EntryKey;
use svcpack::InstanceId;
use svcpack::Invocation;
use svcpack::Package;
use svcpack::PackageKind;
use svcpack::ResponseType;
use svcpack::Value;
use tracing::debug;

use crate::channel::Bus;
use crate::client::Client;
use crate::client::ConnectOptions;
use crate::endpoint::Error;
use crate::endpoint::Fault;
use crate::endpoint::Result;

pub struct RemoteObject {
    client: Arc<Client>,
    instance: InstanceId,
    owns_client: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("instance", &self.instance)
            .field("owns_client", &self.owns_client)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RemoteObject {
    pub(crate) fn new(client: Arc<Client>, instance: InstanceId) -> Self {
        Self { client, instance, owns_client: false, closed: AtomicBool::new(false) }
    }

    /// Connects, authenticates and creates one object. The connection is
    /// private to the returned proxy and closes with it.
    pub async fn connect(bus: &dyn Bus, entry: EntryKey, location: &str, options: ConnectOptions) -> Result<RemoteObject> {
        let client = Client::connect(bus, entry, location, options).await?;
        match client.create_object().await {
            Ok(mut object) => {
                object.owns_client = true;
                Ok(object)
            }
            Err(e) => {
                client.close().await;
                Err(e)
            }
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    pub fn entry(&self) -> &EntryKey {
        self.client.entry()
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.client.state().is_closed()
    }

    pub async fn invoke(&self, call: Invocation) -> Result<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Fault::Disconnected.into());
        }

        let package = Package::request(call.kind(), self.client.entry().clone())
            .with_instance(self.instance)
            .with_payload(call.encode()?);
        let response = self.client.request(package).await?;

        match response.response {
            ResponseType::Success => Ok(Value::decode(&response.payload)?),
            ResponseType::Failed => Err(Error::CallFailed(CallError::decode(&response.payload)?)),
            ResponseType::NotAResponse => Err(Fault::Protocol("request delivered as response".into()).into()),
        }
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke(Invocation::method(method, args)).await
    }

    pub async fn get(&self, property: &str) -> Result<Value> {
        self.invoke(Invocation::get(property)).await
    }

    pub async fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        self.invoke(Invocation::set(property, value)).await.map(|_| ())
    }

    /// Tells the service to release this instance. The connection is closed
    /// too when the proxy owns it.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.client.notify(self.close_package()).await;
        if self.owns_client {
            self.client.close().await;
        }
        debug!(instance = %self.instance, "remote object closed");
        result
    }

    fn close_package(&self) -> Package {
        Package::request(PackageKind::InstanceClose, self.client.entry().clone()).with_instance(self.instance)
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) || self.client.state().is_closed() {
            return;
        }
        // Best effort: without a runtime the service reclaims the instance
        // when the connection drops.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let package = self.close_package();
        let owns_client = self.owns_client;
        handle.spawn(async move {
            let _ = client.notify(package).await;
            if owns_client {
                client.close().await;
            }
        });
    }
}
