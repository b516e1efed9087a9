pub mod chain;
pub mod error;
pub mod handler;
pub mod mux;
pub mod options;
pub mod outbound;
pub mod resolve;
pub mod stream;
pub mod transport;

pub use error::{Result, SshError};
pub use options::SshOption;
pub use outbound::SshOutbound;
