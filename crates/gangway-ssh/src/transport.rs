use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::Channel;
use tokio::sync::{mpsc, Mutex};

use crate::handler::{ClientHandler, TransportEvent};
use crate::mux::Muxed;

/// Shared handle type; tunnel paths clone it to open channels.
pub type SharedHandle = Arc<Mutex<client::Handle<ClientHandler>>>;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// A live SSH transport stack.
///
/// The final hop's handle opens forwarded channels. The parent handles
/// keep the outer hops of a jump chain alive; disconnecting innermost to
/// outermost cascades teardown down to the root TCP carrier, which the
/// outermost session task drops when it exits.
#[derive(Clone)]
pub struct SshTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    id: u64,
    handle: SharedHandle,
    /// Outer hops, outermost first. Empty for a direct connection.
    parents: Vec<SharedHandle>,
    events: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl SshTransport {
    pub(crate) fn new(
        handle: SharedHandle,
        parents: Vec<SharedHandle>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
                handle,
                parents,
                events: Mutex::new(events),
            }),
        }
    }

    /// Open a `direct-tcpip` channel to `host:port` through this transport.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
    ) -> std::result::Result<Channel<Msg>, russh::Error> {
        let handle = self.inner.handle.lock().await;
        handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
    }
}

#[async_trait]
impl Muxed for SshTransport {
    fn id(&self) -> u64 {
        self.inner.id
    }

    async fn died(&self) {
        let mut events = self.inner.events.lock().await;
        match events.recv().await {
            Some(TransportEvent::Disconnected(reason)) => {
                tracing::warn!(transport = self.inner.id, "ssh transport died: {}", reason);
            }
            None => {
                tracing::warn!(transport = self.inner.id, "ssh transport closed");
            }
        }
    }

    async fn close(&self) {
        let handle = self.inner.handle.lock().await;
        if let Err(err) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("transport disconnect failed: {}", err);
        }
        drop(handle);

        for parent in self.inner.parents.iter().rev() {
            let parent = parent.lock().await;
            if let Err(err) = parent
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                tracing::debug!("parent hop disconnect failed: {}", err);
            }
        }
    }
}
