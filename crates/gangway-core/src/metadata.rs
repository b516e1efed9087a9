use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

/// Target of one outbound request, as handed over by the routing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub host: String,
    pub port: u16,
    pub network: Network,
}

impl Metadata {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            network: Network::Tcp,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            network: Network::Udp,
        }
    }

    /// `host:port` form used for dialing and logging.
    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_address() {
        let metadata = Metadata::tcp("example.com", 80);
        assert_eq!(metadata.remote_address(), "example.com:80");
        assert_eq!(metadata.network, Network::Tcp);
    }

    #[test]
    fn test_udp_constructor() {
        let metadata = Metadata::udp("10.0.0.1", 53);
        assert_eq!(metadata.network, Network::Udp);
        assert_eq!(metadata.to_string(), "10.0.0.1:53");
    }
}
