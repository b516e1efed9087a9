use thiserror::Error;

#[derive(Error, Debug)]
pub enum GangwayError {
    #[error("SSH config error: {0}")]
    SshConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GangwayError>;
