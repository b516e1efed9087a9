use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dialer::DialOptions;
use crate::metadata::Metadata;

/// Byte stream handed back to the router for one proxied connection.
pub trait OutboundStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> OutboundStream for T {}

pub type BoxedStream = Box<dyn OutboundStream>;

/// Datagram transport returned by adapters that relay UDP.
pub trait OutboundDatagram: Send {}

pub type BoxedDatagram = Box<dyn OutboundDatagram>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterType {
    Direct,
    Ssh,
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterType::Direct => write!(f, "Direct"),
            AdapterType::Ssh => write!(f, "Ssh"),
        }
    }
}

/// Contract between the routing engine and one outbound adapter.
///
/// Cancellation is carried by the calling future: dropping a pending
/// `dial` abandons the attempt.
#[async_trait]
pub trait Outbound: Send + Sync {
    fn name(&self) -> &str;

    fn adapter_type(&self) -> AdapterType;

    fn supports_udp(&self) -> bool {
        false
    }

    /// Interface the adapter's own traffic is bound to, if any.
    fn interface(&self) -> Option<&str> {
        None
    }

    fn routing_mark(&self) -> Option<u32> {
        None
    }

    /// Open a proxied TCP connection to the metadata target.
    async fn dial(&self, metadata: &Metadata, opts: &DialOptions) -> anyhow::Result<BoxedStream>;

    /// Open a UDP relay session for the metadata target.
    async fn listen_packet(
        &self,
        metadata: &Metadata,
        opts: &DialOptions,
    ) -> anyhow::Result<BoxedDatagram>;

    /// Layer the adapter's protocol over an externally established carrier.
    async fn stream_conn(
        &self,
        carrier: BoxedStream,
        metadata: &Metadata,
    ) -> anyhow::Result<BoxedStream>;
}
