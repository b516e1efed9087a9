pub mod ssh_config;

pub use ssh_config::{expand_tilde, home_dir, SshConfigView, SshHostParams};
