use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

/// Default bound on TCP connects and SSH handshakes.
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request options forwarded from the router to the dialer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    pub interface: Option<String>,
    pub routing_mark: Option<u32>,
}

/// Opens the raw TCP carrier for an outbound adapter's first hop.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str, opts: &DialOptions) -> io::Result<TcpStream>;
}

/// Default dialer: plain tokio connect with interface binding and
/// routing marks applied where the platform supports them.
#[derive(Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str, opts: &DialOptions) -> io::Result<TcpStream> {
        let target = resolve_first(addr).await?;
        let socket = if target.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        apply_options(&socket, opts)?;
        tokio::time::timeout(DEFAULT_TCP_TIMEOUT, socket.connect(target))
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr} timed out"))
            })?
    }
}

async fn resolve_first(addr: &str) -> io::Result<SocketAddr> {
    lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}")))
}

#[cfg(any(target_os = "android", target_os = "linux"))]
fn apply_options(socket: &TcpSocket, opts: &DialOptions) -> io::Result<()> {
    let sock = SockRef::from(socket);
    if let Some(interface) = &opts.interface {
        sock.bind_device(Some(interface.as_bytes()))?;
    }
    if let Some(mark) = opts.routing_mark {
        sock.set_mark(mark)?;
    }
    Ok(())
}

#[cfg(not(any(target_os = "android", target_os = "linux")))]
fn apply_options(_socket: &TcpSocket, opts: &DialOptions) -> io::Result<()> {
    if opts.interface.is_some() || opts.routing_mark.is_some() {
        tracing::warn!("interface binding and routing marks are only applied on linux");
    }
    Ok(())
}

/// Enable TCP keepalive on an established carrier. Best effort.
pub fn tcp_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(15));
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("failed to enable tcp keepalive: {}", err);
    }
}
