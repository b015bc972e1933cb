//! In-process transport.
//!
//! [`DuplexChannel`] pairs two tokio mpsc channels; [`LocalBus`] hands out
//! such pairs by address. Both serve single-process deployments and tests.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel;
use crate::channel::Address;
use crate::channel::Bus;
use crate::channel::Channel;
use crate::channel::Credentials;
use crate::channel::Listener;

/// A duplex channel built from two unbounded mpsc queues.
///
/// Buffers sent on one half appear on the other half's `recv`, in order.
pub struct DuplexChannel {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    remote: Credentials,
}

impl DuplexChannel {
    /// Creates two connected halves. Each half reports the *other* side's
    /// credentials.
    pub fn pair(a_credentials: Credentials, b_credentials: Credentials) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: parking_lot::Mutex::new(Some(tx_a)),
            rx: Arc::new(Mutex::new(rx_b)),
            remote: b_credentials,
        };

        let b = Self {
            tx: parking_lot::Mutex::new(Some(tx_b)),
            rx: Arc::new(Mutex::new(rx_a)),
            remote: a_credentials,
        };

        (a, b)
    }
}

#[async_trait::async_trait]
impl Channel for DuplexChannel {
    async fn send(&self, payload: &[u8]) -> channel::Result<()> {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| channel::Error::ConnectionLost("channel closed locally".into()))?;
        tx.send(payload.to_vec())
            .map_err(|_| channel::Error::ConnectionLost("peer hung up".into()))
    }

    async fn recv(&self) -> channel::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    fn credentials(&self) -> &Credentials {
        &self.remote
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}

/// An address namespace living inside one process.
#[derive(Clone)]
pub struct LocalBus {
    listeners: Arc<DashMap<Address, mpsc::UnboundedSender<Box<dyn Channel>>>>,
    credentials: Credentials,
}

impl LocalBus {
    /// `credentials` is what listeners report to connecting clients.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            credentials,
        }
    }

    pub fn is_bound(&self, address: &Address) -> bool {
        self.listeners.get(address).is_some_and(|tx| !tx.is_closed())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(Credentials::current())
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    async fn bind(&self, address: &Address) -> channel::Result<Box<dyn Listener>> {
        if self.is_bound(address) {
            return Err(channel::Error::AddressInUse(address.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(address.clone(), tx);
        debug!(%address, "bound local listener");

        Ok(Box::new(LocalListener {
            address: address.clone(),
            incoming: Mutex::new(rx),
            listeners: self.listeners.clone(),
        }))
    }

    async fn connect(&self, address: &Address, credentials: Credentials) -> channel::Result<Box<dyn Channel>> {
        let tx = self
            .listeners
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| channel::Error::NoListener(address.clone()))?;

        let (client, server) = DuplexChannel::pair(credentials, self.credentials.clone());
        if tx.send(Box::new(server)).is_err() {
            self.listeners.remove_if(address, |_, tx| tx.is_closed());
            return Err(channel::Error::NoListener(address.clone()));
        }
        Ok(Box::new(client))
    }
}

struct LocalListener {
    address: Address,
    incoming: Mutex<mpsc::UnboundedReceiver<Box<dyn Channel>>>,
    listeners: Arc<DashMap<Address, mpsc::UnboundedSender<Box<dyn Channel>>>>,
}

#[async_trait::async_trait]
impl Listener for LocalListener {
    async fn accept(&self) -> Option<Box<dyn Channel>> {
        self.incoming.lock().await.recv().await
    }

    fn address(&self) -> &Address {
        &self.address
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        self.listeners.remove(&self.address);
        debug!(address = %self.address, "unbound local listener");
    }
}
