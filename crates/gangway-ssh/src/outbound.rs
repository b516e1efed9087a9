use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gangway_core::adapter::{AdapterType, BoxedDatagram, BoxedStream, Outbound};
use gangway_core::config::SshConfigView;
use gangway_core::dialer::{DialOptions, Dialer, TcpDialer, DEFAULT_TCP_TIMEOUT};
use gangway_core::metadata::Metadata;
use russh::client;

use crate::chain;
use crate::error::{Result, SshError};
use crate::mux::Mux;
use crate::options::SshOption;
use crate::resolve::{load_base_auth, AuthMethod, Hop, Resolver, DEFAULT_SSH_PORT};
use crate::stream::{CompatStream, TeardownFuture, TunnelStream};
use crate::transport::SshTransport;

/// SSH outbound: tunnels TCP flows through `direct-tcpip` channels on a
/// shared, lazily reconnected SSH transport, optionally chained through
/// jump hosts.
pub struct SshOutbound {
    name: String,
    addr: String,
    interface: Option<String>,
    routing_mark: Option<u32>,
    user: String,
    base_auth: Vec<AuthMethod>,
    proxy_jump: Option<String>,
    view: Arc<SshConfigView>,
    config: Arc<client::Config>,
    timeout: Duration,
    dialer: Arc<dyn Dialer>,
    mux: Mux<SshTransport>,
}

impl SshOutbound {
    pub fn new(option: SshOption) -> Result<Self> {
        Self::with_dialer(option, Arc::new(TcpDialer))
    }

    /// Same as [`SshOutbound::new`], with the root-hop dialer injected.
    pub fn with_dialer(option: SshOption, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let view = Arc::new(SshConfigView::load_default()?);
        Self::build(option, dialer, view)
    }

    fn build(
        mut option: SshOption,
        dialer: Arc<dyn Dialer>,
        view: Arc<SshConfigView>,
    ) -> Result<Self> {
        if option.name.is_empty() || option.server.is_empty() {
            return Err(SshError::InvalidOption(
                "name and server are required".into(),
            ));
        }

        if option.use_ssh_config {
            Resolver::new(&view).load_for_primary(&mut option)?;
        }

        let base_auth = load_base_auth(&option.privatekey, &option.password)?;
        let port = option.port.unwrap_or(DEFAULT_SSH_PORT);

        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: None,
            ..Default::default()
        };

        Ok(Self {
            name: option.name,
            addr: format!("{}:{}", option.server, port),
            interface: (!option.interface.is_empty()).then_some(option.interface),
            routing_mark: option.routing_mark,
            user: option.username,
            base_auth,
            proxy_jump: (!option.proxy_jump.is_empty()).then_some(option.proxy_jump),
            view,
            config: Arc::new(config),
            timeout: DEFAULT_TCP_TIMEOUT,
            dialer,
            mux: Mux::new(),
        })
    }

    /// Hop list for one transport: jump-spec tokens in order, then the
    /// final target with the adapter's base configuration.
    fn resolve_hops(&self) -> Vec<Hop> {
        let resolver = Resolver::new(&self.view);
        let mut hops = Vec::new();

        if let Some(spec) = &self.proxy_jump {
            for token in spec.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                hops.push(resolver.jump_hop(token, &self.user, &self.base_auth));
            }
        }

        hops.push(self.base_hop());
        hops
    }

    fn base_hop(&self) -> Hop {
        Hop {
            addr: self.addr.clone(),
            user: self.user.clone(),
            auth: self.base_auth.clone(),
        }
    }

    async fn connect(&self, opts: &DialOptions) -> Result<SshTransport> {
        let hops = self.resolve_hops();
        tracing::debug!(
            name = %self.name,
            hops = hops.len(),
            "establishing ssh transport"
        );
        chain::dial_chain(
            self.dialer.as_ref(),
            opts,
            &hops,
            self.config.clone(),
            self.timeout,
        )
        .await
    }

    fn effective_options(&self, opts: &DialOptions) -> DialOptions {
        let mut effective = opts.clone();
        if self.interface.is_some() {
            effective.interface = self.interface.clone();
        }
        if self.routing_mark.is_some() {
            effective.routing_mark = self.routing_mark;
        }
        effective
    }
}

#[async_trait]
impl Outbound for SshOutbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ssh
    }

    fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn routing_mark(&self) -> Option<u32> {
        self.routing_mark
    }

    async fn dial(&self, metadata: &Metadata, opts: &DialOptions) -> anyhow::Result<BoxedStream> {
        let opts = self.effective_options(opts);
        let transport = self.mux.ensure(|| self.connect(&opts)).await?;

        let channel = transport
            .open_direct_tcpip(&metadata.host, metadata.port)
            .await
            .map_err(|err| SshError::Dial(err.to_string()))?;

        Ok(Box::new(TunnelStream::new(channel.into_stream())))
    }

    async fn listen_packet(
        &self,
        _metadata: &Metadata,
        _opts: &DialOptions,
    ) -> anyhow::Result<BoxedDatagram> {
        Err(SshError::UnsupportedUdp.into())
    }

    /// Build a private, non-multiplexed transport on the supplied
    /// carrier and open one forwarded stream over it. The shared
    /// transport state is not touched. Closing the returned stream shuts
    /// the forwarded channel, then the private transport (and with it
    /// the carrier), surfacing the first failure.
    async fn stream_conn(
        &self,
        carrier: BoxedStream,
        metadata: &Metadata,
    ) -> anyhow::Result<BoxedStream> {
        let hop = self.base_hop();
        let (handle, _events) =
            chain::handshake(self.config.clone(), carrier, &hop, self.timeout).await?;

        let channel = handle
            .channel_open_direct_tcpip(&metadata.host, u32::from(metadata.port), "127.0.0.1", 0)
            .await
            .map_err(|err| SshError::Dial(err.to_string()))?;

        let stream = channel.into_stream();
        let teardown = move || -> TeardownFuture {
            Box::pin(async move {
                handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
            })
        };

        Ok(Box::new(CompatStream::new(stream, teardown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(name: &str, server: &str) -> SshOption {
        SshOption {
            name: name.into(),
            server: server.into(),
            password: "p".into(),
            ..Default::default()
        }
    }

    fn build(option: SshOption) -> Result<SshOutbound> {
        SshOutbound::build(
            option,
            Arc::new(TcpDialer),
            Arc::new(SshConfigView::empty()),
        )
    }

    fn build_err(option: SshOption) -> SshError {
        match build(option) {
            Ok(_) => panic!("construction unexpectedly succeeded"),
            Err(err) => err,
        }
    }

    #[test]
    fn test_missing_name_or_server_is_rejected() {
        let err = build_err(option("", "10.0.0.1"));
        assert!(matches!(err, SshError::InvalidOption(_)));

        let err = build_err(option("corp", ""));
        assert!(matches!(err, SshError::InvalidOption(_)));
    }

    #[test]
    fn test_no_auth_method_is_rejected() {
        let mut opt = option("corp", "10.0.0.1");
        opt.password.clear();
        assert!(matches!(build_err(opt), SshError::NoAuthMethod));
    }

    #[test]
    fn test_unreadable_key_is_rejected() {
        let mut opt = option("corp", "10.0.0.1");
        opt.privatekey = "/nonexistent/key".into();
        assert!(matches!(build_err(opt), SshError::KeyRead { .. }));
    }

    #[test]
    fn test_addr_defaults_to_port_22() {
        let outbound = build(option("corp", "10.0.0.1")).unwrap();
        assert_eq!(outbound.addr, "10.0.0.1:22");

        let mut opt = option("corp", "10.0.0.1");
        opt.port = Some(2222);
        let outbound = build(opt).unwrap();
        assert_eq!(outbound.addr, "10.0.0.1:2222");
    }

    #[test]
    fn test_introspection() {
        let mut opt = option("corp", "10.0.0.1");
        opt.interface = "eth0".into();
        opt.routing_mark = Some(6969);
        let outbound = build(opt).unwrap();

        assert_eq!(outbound.name(), "corp");
        assert_eq!(outbound.adapter_type(), AdapterType::Ssh);
        assert!(!outbound.supports_udp());
        assert_eq!(outbound.interface(), Some("eth0"));
        assert_eq!(outbound.routing_mark(), Some(6969));
    }

    #[test]
    fn test_hop_list_appends_final_target() {
        let mut opt = option("corp", "10.0.0.1");
        opt.username = "alice".into();
        opt.proxy_jump = "bob@jump1.example:2222, ,jump2.example,".into();
        let outbound = build(opt).unwrap();

        let hops = outbound.resolve_hops();
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0].addr, "jump1.example:2222");
        assert_eq!(hops[0].user, "bob");
        assert_eq!(hops[1].addr, "jump2.example:22");
        assert_eq!(hops[1].user, "alice");
        assert_eq!(hops[2].addr, "10.0.0.1:22");
        assert_eq!(hops[2].user, "alice");
    }

    #[test]
    fn test_direct_hop_list_is_just_the_target() {
        let outbound = build(option("corp", "10.0.0.1")).unwrap();
        let hops = outbound.resolve_hops();
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].addr, "10.0.0.1:22");
    }

    #[test]
    fn test_adapter_options_override_request_options() {
        let mut opt = option("corp", "10.0.0.1");
        opt.interface = "tun0".into();
        let outbound = build(opt).unwrap();

        let effective = outbound.effective_options(&DialOptions {
            interface: Some("eth0".into()),
            routing_mark: Some(1),
        });
        assert_eq!(effective.interface.as_deref(), Some("tun0"));
        assert_eq!(effective.routing_mark, Some(1));
    }

    #[tokio::test]
    async fn test_udp_is_refused() {
        let outbound = build(option("corp", "10.0.0.1")).unwrap();
        let err = match outbound
            .listen_packet(&Metadata::udp("example.com", 53), &DialOptions::default())
            .await
        {
            Ok(_) => panic!("udp listen unexpectedly succeeded"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<SshError>(),
            Some(SshError::UnsupportedUdp)
        ));
    }
}
