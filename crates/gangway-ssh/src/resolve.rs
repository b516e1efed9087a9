use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gangway_core::config::{expand_tilde, home_dir, SshConfigView};
use russh_keys::key::KeyPair;

use crate::error::{Result, SshError};
use crate::options::SshOption;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One authentication method offered during a hop's handshake.
#[derive(Clone)]
pub enum AuthMethod {
    Key(Arc<KeyPair>),
    Password(String),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Key(_) => f.write_str("Key"),
            AuthMethod::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Fully resolved descriptor for one SSH hop.
#[derive(Debug, Clone)]
pub struct Hop {
    /// `host:port` the hop is reached at.
    pub addr: String,
    pub user: String,
    pub auth: Vec<AuthMethod>,
}

/// SSH-config attributes for a jump host, defaults applied.
#[derive(Debug, Clone, Default)]
pub struct JumpHostEntry {
    pub host_name: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub identity_files: Vec<PathBuf>,
    pub password: Option<String>,
}

/// Resolves adapter options and jump tokens against the SSH config
/// view. Holds the home directory so the identity probe is a pure
/// function of its inputs.
pub struct Resolver<'a> {
    view: &'a SshConfigView,
    home: Option<PathBuf>,
}

impl<'a> Resolver<'a> {
    pub fn new(view: &'a SshConfigView) -> Self {
        Self {
            view,
            home: home_dir(),
        }
    }

    pub fn with_home(view: &'a SshConfigView, home: Option<PathBuf>) -> Self {
        Self { view, home }
    }

    /// Merge the SSH-config entry for `option.server` into `option`.
    /// Caller-provided values win on every field except `HostName`; see
    /// the note below.
    pub fn load_for_primary(&self, option: &mut SshOption) -> Result<()> {
        let params = self.view.query(&option.server);

        // Compatibility: a non-empty HostName always replaces the
        // server, even when the caller set one.
        if let Some(host_name) = params.host_name.filter(|h| !h.is_empty()) {
            option.server = host_name;
        }
        if option.port.is_none() {
            option.port = params.port;
        }
        if option.username.is_empty() {
            if let Some(user) = params.user.filter(|u| !u.is_empty()) {
                option.username = user;
            }
        }
        if option.username.is_empty() {
            tracing::warn!(
                server = %option.server,
                "no ssh user configured and none found in ssh config"
            );
        }
        if option.privatekey.is_empty() {
            option.privatekey = join_paths(&params.identity_files);
        }
        if option.privatekey.is_empty() {
            option.privatekey = join_paths(&self.probe_default_keys()?);
        }
        if option.proxy_jump.is_empty() {
            if let Some(jump) = params.proxy_jump {
                option.proxy_jump = jump;
            }
        }
        if option.password.is_empty() {
            if let Some(password) = params.password {
                option.password = password;
            }
        }

        Ok(())
    }

    /// Fresh descriptor for a jump host: SSH-config entry for `host`
    /// with port defaulting to 22 and the standard identity probe.
    pub fn load_for_jump_host(&self, host: &str) -> JumpHostEntry {
        let params = self.view.query(host);
        let mut identity_files = params.identity_files;
        if identity_files.is_empty() {
            identity_files = self.probe_default_keys().unwrap_or_default();
        }

        JumpHostEntry {
            host_name: params.host_name.filter(|h| !h.is_empty()),
            port: params.port.unwrap_or(DEFAULT_SSH_PORT),
            user: params.user.filter(|u| !u.is_empty()),
            identity_files,
            password: params.password.filter(|p| !p.is_empty()),
        }
    }

    /// Build the descriptor for one `[user@]host[:port]` jump token.
    ///
    /// User precedence: inline > SSH-config > adapter base. Credentials
    /// come from the SSH-config entry when it yields any usable key or
    /// password, otherwise from the adapter base. A non-empty `HostName`
    /// replaces the host portion, keeping the port the token carried.
    pub fn jump_hop(&self, token: &str, base_user: &str, base_auth: &[AuthMethod]) -> Hop {
        let (inline_user, host_port) = match token.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user), rest),
            Some((_, rest)) => (None, rest),
            None => (None, token),
        };
        let (host, token_port) = split_host_port(host_port);
        let entry = self.load_for_jump_host(host);

        let user = inline_user
            .map(str::to_string)
            .or(entry.user)
            .unwrap_or_else(|| base_user.to_string());

        let mut auth = Vec::new();
        if !entry.identity_files.is_empty() || entry.password.is_some() {
            auth = load_keys_lenient(&entry.identity_files);
            if let Some(password) = entry.password {
                auth.push(AuthMethod::Password(password));
            }
        }
        if auth.is_empty() {
            auth = base_auth.to_vec();
        }

        let addr = match (entry.host_name, token_port) {
            (Some(host_name), Some(port)) => format!("{host_name}:{port}"),
            (Some(host_name), None) => format!("{host_name}:{}", entry.port),
            (None, Some(port)) => format!("{host}:{port}"),
            (None, None) => format!("{host}:{DEFAULT_SSH_PORT}"),
        };

        Hop { addr, user, auth }
    }

    /// Probe the standard identity files, keeping the ones that exist.
    pub fn probe_default_keys(&self) -> Result<Vec<PathBuf>> {
        let home = self.home.as_deref().ok_or(SshError::NoHomeDir)?;
        Ok(["id_rsa", "id_ed25519"]
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .filter(|path| path.exists())
            .collect())
    }
}

/// Build the adapter's base authentication list. Unlike jump-hop
/// resolution, key errors here are fatal.
pub fn load_base_auth(privatekey: &str, password: &str) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    for part in privatekey.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let path = expand_tilde(Path::new(part));
        let data = std::fs::read_to_string(&path).map_err(|source| SshError::KeyRead {
            path: path.clone(),
            source,
        })?;
        let key = russh_keys::decode_secret_key(&data, None).map_err(|err| SshError::KeyParse {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        methods.push(AuthMethod::Key(Arc::new(key)));
    }
    if !password.is_empty() {
        methods.push(AuthMethod::Password(password.to_string()));
    }
    if methods.is_empty() {
        return Err(SshError::NoAuthMethod);
    }
    Ok(methods)
}

/// Load the given key files, skipping any that cannot be read or parsed.
fn load_keys_lenient(paths: &[PathBuf]) -> Vec<AuthMethod> {
    let mut methods = Vec::new();
    for path in paths {
        match std::fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|data| {
                russh_keys::decode_secret_key(&data, None).map_err(|err| err.to_string())
            }) {
            Ok(key) => methods.push(AuthMethod::Key(Arc::new(key))),
            Err(err) => {
                tracing::debug!(
                    path = %path.display(),
                    "skipping unusable identity file: {}",
                    err
                );
            }
        }
    }
    methods
}

/// Split `host[:port]`, tolerating tokens whose suffix is not a valid
/// port by treating the whole input as a hostname.
fn split_host_port(input: &str) -> (&str, Option<u16>) {
    match input.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) if !host.is_empty() => (host, Some(port)),
            _ => (input, None),
        },
        None => (input, None),
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",")
}
