pub mod adapter;
pub mod config;
pub mod dialer;
pub mod error;
pub mod metadata;

pub use adapter::{AdapterType, BoxedDatagram, BoxedStream, Outbound, OutboundStream};
pub use dialer::{DialOptions, Dialer, TcpDialer, DEFAULT_TCP_TIMEOUT};
pub use error::{GangwayError, Result};
pub use metadata::{Metadata, Network};
