use async_trait::async_trait;
use russh::client::{self, DisconnectReason};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;

/// Raised by the handler when its transport terminates.
#[derive(Debug)]
pub enum TransportEvent {
    Disconnected(String),
}

/// Client-side handler for one SSH transport.
///
/// The server key is accepted unconditionally: the adapter tunnels to
/// operator-configured servers and performs no host-key verification.
pub struct ClientHandler {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ClientHandler {
    pub fn new(event_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { event_tx }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        let message = match reason {
            DisconnectReason::ReceivedDisconnect(info) => {
                format!("server disconnected: {:?}", info)
            }
            DisconnectReason::Error(err) => format!("connection error: {}", err),
        };
        let _ = self.event_tx.send(TransportEvent::Disconnected(message));
        Ok(())
    }
}
