use serde::Deserialize;

/// One `ssh` outbound section of the proxy configuration.
///
/// String fields default to empty, matching the merge rules in
/// [`crate::resolve`]: an empty value means "not provided" and may be
/// filled from the SSH config file. `port` stays `None` until someone
/// sets it so the resolver can tell an explicit 22 from an omitted port.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshOption {
    pub name: String,
    pub server: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub privatekey: String,
    #[serde(rename = "proxy-jump")]
    pub proxy_jump: String,
    #[serde(rename = "use-ssh-config")]
    pub use_ssh_config: bool,
    #[serde(rename = "interface-name")]
    pub interface: String,
    #[serde(rename = "routing-mark")]
    pub routing_mark: Option<u32>,
}
