use std::sync::Arc;
use std::time::Duration;

use gangway_core::dialer::{tcp_keepalive, DialOptions, Dialer};
use russh::client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, SshError};
use crate::handler::{ClientHandler, TransportEvent};
use crate::resolve::{AuthMethod, Hop, DEFAULT_SSH_PORT};
use crate::transport::{SharedHandle, SshTransport};

/// Dial the first hop's TCP carrier and stack SSH transports through
/// every subsequent hop, returning the innermost transport.
///
/// On failure at hop `i`, the hops built so far are disconnected in
/// reverse order; the TCP carrier closes when the outermost session
/// winds down. On success the outer transports live on as parents of the
/// returned one.
pub async fn dial_chain(
    dialer: &dyn Dialer,
    opts: &DialOptions,
    hops: &[Hop],
    config: Arc<client::Config>,
    timeout: Duration,
) -> Result<SshTransport> {
    let first = &hops[0];
    let tcp = dialer
        .dial(&first.addr, opts)
        .await
        .map_err(|source| SshError::JumpTcpDial {
            addr: first.addr.clone(),
            source,
        })?;
    tcp_keepalive(&tcp);

    let (handle, mut events) = handshake(config.clone(), tcp, first, timeout).await?;
    let mut current: SharedHandle = Arc::new(Mutex::new(handle));
    let mut parents: Vec<SharedHandle> = Vec::new();

    for (index, hop) in hops.iter().enumerate().skip(1) {
        let (host, port) = hop_target(&hop.addr);
        let opened = {
            let previous = current.lock().await;
            previous
                .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
                .await
        };
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                teardown(&parents, &current).await;
                return Err(SshError::JumpDial {
                    hop: index - 1,
                    addr: hop.addr.clone(),
                    reason: err.to_string(),
                });
            }
        };

        match handshake(config.clone(), channel.into_stream(), hop, timeout).await {
            Ok((handle, hop_events)) => {
                events = hop_events;
                parents.push(current);
                current = Arc::new(Mutex::new(handle));
            }
            Err(err) => {
                teardown(&parents, &current).await;
                return Err(err);
            }
        }
    }

    Ok(SshTransport::new(current, parents, events))
}

/// Run the SSH handshake and authentication for one hop over an
/// established carrier, bounded by the hop timeout.
pub async fn handshake<S>(
    config: Arc<client::Config>,
    stream: S,
    hop: &Hop,
    timeout: Duration,
) -> Result<(
    client::Handle<ClientHandler>,
    mpsc::UnboundedReceiver<TransportEvent>,
)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let handler = ClientHandler::new(event_tx);

    let connect = async {
        let mut handle = client::connect_stream(config, stream, handler)
            .await
            .map_err(|err| handshake_error(hop, err.to_string()))?;
        authenticate(&mut handle, hop).await?;
        Ok::<_, SshError>(handle)
    };

    let handle = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| handshake_error(hop, "handshake timed out".to_string()))??;

    Ok((handle, event_rx))
}

async fn authenticate(handle: &mut client::Handle<ClientHandler>, hop: &Hop) -> Result<()> {
    for method in &hop.auth {
        let attempt = match method {
            AuthMethod::Key(key) => {
                handle
                    .authenticate_publickey(hop.user.as_str(), key.clone())
                    .await
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(hop.user.as_str(), password.as_str())
                    .await
            }
        };
        match attempt {
            Ok(true) => return Ok(()),
            Ok(false) => continue,
            Err(err) => {
                tracing::debug!(addr = %hop.addr, "authentication attempt failed: {}", err);
            }
        }
    }
    Err(handshake_error(
        hop,
        "all authentication methods rejected".to_string(),
    ))
}

fn handshake_error(hop: &Hop, reason: String) -> SshError {
    SshError::JumpHandshake {
        user: hop.user.clone(),
        addr: hop.addr.clone(),
        reason,
    }
}

/// Disconnect a partially built chain, innermost hop first.
async fn teardown(parents: &[SharedHandle], current: &SharedHandle) {
    for handle in std::iter::once(current).chain(parents.iter().rev()) {
        let guard = handle.lock().await;
        if let Err(err) = guard
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("disconnect during chain teardown failed: {}", err);
        }
    }
}

fn hop_target(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (addr, DEFAULT_SSH_PORT),
        },
        None => (addr, DEFAULT_SSH_PORT),
    }
}
