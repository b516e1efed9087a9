use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("invalid ssh option: {0}")]
    InvalidOption(String),
    #[error("no authentication method provided")]
    NoAuthMethod,
    #[error("failed to get home directory")]
    NoHomeDir,
    #[error("failed to read private key {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse private key {}: {reason}", .path.display())]
    KeyParse { path: PathBuf, reason: String },
    #[error(transparent)]
    SshConfig(#[from] gangway_core::GangwayError),
    #[error("{addr} connect error: {source}")]
    JumpTcpDial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh handshake with {user}@{addr} failed: {reason}")]
    JumpHandshake {
        user: String,
        addr: String,
        reason: String,
    },
    #[error("hop {hop} failed to open forwarded channel to {addr}: {reason}")]
    JumpDial {
        hop: usize,
        addr: String,
        reason: String,
    },
    #[error("ssh tunnel dial failed: {0}")]
    Dial(String),
    #[error("ssh outbound does not support UDP")]
    UnsupportedUdp,
}

pub type Result<T> = std::result::Result<T, SshError>;
