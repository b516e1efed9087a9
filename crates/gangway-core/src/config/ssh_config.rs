use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{GangwayError, Result};

/// Attribute set resolved for a single host pattern.
///
/// Absent attributes stay `None`; the adapter layer decides defaults.
#[derive(Debug, Clone, Default)]
pub struct SshHostParams {
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_files: Vec<PathBuf>,
    pub proxy_jump: Option<String>,
    pub password: Option<String>,
}

/// Read-only view over the user-level SSH configuration file.
///
/// `HostName`, `Port`, `User` and `IdentityFile` come from the
/// ssh2_config crate; `ProxyJump` and `Password` are not exposed by it,
/// so a manual pass collects them per host alias.
pub struct SshConfigView {
    config: Option<ssh2_config::SshConfig>,
    extras: HashMap<String, ExtraHostFields>,
}

impl SshConfigView {
    /// A view with no host entries at all.
    pub fn empty() -> Self {
        Self {
            config: None,
            extras: HashMap::new(),
        }
    }

    /// Load `$HOME/.ssh/config`. A missing home directory or config file
    /// yields an empty view; an unreadable file is an error.
    pub fn load_default() -> Result<Self> {
        match home_dir() {
            Some(home) => Self::load_file(&home.join(".ssh").join("config")),
            None => Ok(Self::empty()),
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::empty()),
            Err(err) => {
                return Err(GangwayError::SshConfig(format!(
                    "failed to read {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut reader = std::io::BufReader::new(content.as_bytes());
        let config = ssh2_config::SshConfig::default()
            .parse(&mut reader, ssh2_config::ParseRule::ALLOW_UNKNOWN_FIELDS)
            .map_err(|err| GangwayError::SshConfig(format!("parse error: {err}")))?;

        Ok(Self {
            config: Some(config),
            extras: parse_extra_fields(content),
        })
    }

    /// Resolve the attribute set for `host`. Hosts without an entry
    /// produce an all-empty set.
    pub fn query(&self, host: &str) -> SshHostParams {
        let mut params = SshHostParams::default();

        if let Some(config) = &self.config {
            let resolved = config.query(host);
            params.host_name = resolved.host_name.clone();
            params.port = resolved.port;
            params.user = resolved.user.clone();
            params.identity_files = resolved
                .identity_file
                .clone()
                .unwrap_or_default()
                .iter()
                .map(|path| expand_tilde(path))
                .collect();
        }

        if let Some(extra) = self.extras.get(host) {
            params.proxy_jump = extra.proxy_jump.clone();
            params.password = extra.password.clone();
        }

        params
    }
}

/// Locate the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match (text.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Returns true if the pattern is wildcard-only (e.g., "*", "?", "*.*")
fn is_wildcard_only(pattern: &str) -> bool {
    pattern.chars().all(|c| c == '*' || c == '?' || c == '.')
}

/// Fields per host that ssh2_config doesn't expose.
#[derive(Debug, Default)]
struct ExtraHostFields {
    proxy_jump: Option<String>,
    password: Option<String>,
}

/// Manually collect SSH config fields not covered by ssh2_config.
fn parse_extra_fields(content: &str) -> HashMap<String, ExtraHostFields> {
    let mut result: HashMap<String, ExtraHostFields> = HashMap::new();
    let mut current_hosts: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(rest) = strip_keyword(trimmed, "Host") {
            current_hosts = rest
                .split_whitespace()
                .filter(|h| !is_wildcard_only(h))
                .map(|h| h.to_string())
                .collect();
            for host in &current_hosts {
                result.entry(host.clone()).or_default();
            }
            continue;
        }

        // Match blocks are out of scope for this parser.
        if strip_keyword(trimmed, "Match").is_some() {
            current_hosts.clear();
            continue;
        }

        if current_hosts.is_empty() {
            continue;
        }

        if let Some(value) = strip_keyword(trimmed, "ProxyJump") {
            for host in &current_hosts {
                if let Some(fields) = result.get_mut(host) {
                    fields.proxy_jump = Some(value.to_string());
                }
            }
            continue;
        }

        if let Some(value) = strip_keyword(trimmed, "Password") {
            for host in &current_hosts {
                if let Some(fields) = result.get_mut(host) {
                    fields.password = Some(value.to_string());
                }
            }
            continue;
        }
    }

    result
}

/// Strip a keyword (case-insensitive) from a line and return the value part.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    // Handle both "Keyword value" and "Keyword=value"
    let lower = line.to_lowercase();
    let kw_lower = keyword.to_lowercase();

    if lower.starts_with(&kw_lower) {
        let rest = &line[keyword.len()..];
        if let Some(stripped) = rest.strip_prefix('=') {
            Some(stripped.trim())
        } else if rest.starts_with(' ') || rest.starts_with('\t') {
            Some(rest.trim())
        } else {
            None
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
Host bastion
    HostName bastion.example.com
    User admin
    Port 2200
    IdentityFile ~/.ssh/bastion_key
    Password hunter2

Host webserver
    HostName 10.0.0.5
    User deploy
    ProxyJump bastion
"#;

    #[test]
    fn test_query_known_host() {
        let view = SshConfigView::parse(CONFIG).unwrap();
        let params = view.query("bastion");
        assert_eq!(params.host_name.as_deref(), Some("bastion.example.com"));
        assert_eq!(params.port, Some(2200));
        assert_eq!(params.user.as_deref(), Some("admin"));
        assert_eq!(params.identity_files.len(), 1);
        assert!(!params.identity_files[0].to_string_lossy().starts_with('~'));
        assert_eq!(params.password.as_deref(), Some("hunter2"));
        assert!(params.proxy_jump.is_none());
    }

    #[test]
    fn test_query_proxy_jump_extra_field() {
        let view = SshConfigView::parse(CONFIG).unwrap();
        let params = view.query("webserver");
        assert_eq!(params.host_name.as_deref(), Some("10.0.0.5"));
        assert_eq!(params.proxy_jump.as_deref(), Some("bastion"));
        assert!(params.password.is_none());
    }

    #[test]
    fn test_query_unknown_host_is_empty() {
        let view = SshConfigView::parse(CONFIG).unwrap();
        let params = view.query("nowhere");
        assert!(params.host_name.is_none());
        assert!(params.user.is_none());
        assert!(params.identity_files.is_empty());
        assert!(params.proxy_jump.is_none());
    }

    #[test]
    fn test_missing_file_is_empty_view() {
        let dir = tempfile::tempdir().unwrap();
        let view = SshConfigView::load_file(&dir.path().join("config")).unwrap();
        let params = view.query("anything");
        assert!(params.host_name.is_none());
    }

    #[test]
    fn test_is_wildcard_only() {
        assert!(is_wildcard_only("*"));
        assert!(is_wildcard_only("?"));
        assert!(!is_wildcard_only("myhost"));
        assert!(!is_wildcard_only("*.example.com"));
    }

    #[test]
    fn test_strip_keyword() {
        assert_eq!(strip_keyword("Host myserver", "Host"), Some("myserver"));
        assert_eq!(strip_keyword("ProxyJump bastion", "ProxyJump"), Some("bastion"));
        assert_eq!(strip_keyword("Password=secret", "Password"), Some("secret"));
        assert_eq!(strip_keyword("Something else", "Host"), None);
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.ssh/id_rsa"));
        if home_dir().is_some() {
            assert!(!expanded.to_string_lossy().starts_with('~'));
        }

        let abs = PathBuf::from("/etc/ssh/id_rsa");
        assert_eq!(expand_tilde(&abs), abs);
    }
}
