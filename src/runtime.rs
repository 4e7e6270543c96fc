//! Wires a [`Config`] into a running node: a root [`Poa`], whichever
//! transport listeners the config's ports enable, and the client-side
//! connectors so the same process can dial back out. Grounded on
//! `services/forwarder::main`'s "load config, init subsystems" shape,
//! generalized from one fixed subsystem list to the config-gated set of
//! transport drivers this runtime owns.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use nprpc_core::{IdPolicy, Lifespan, ListenConfig, Poa, RpcCore};
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

use crate::config::Config;
use crate::error::Error;
use crate::router::build_router;
use crate::tls::{build_https_server_config, build_quic_server_endpoint};

const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(90);

/// A running node: its [`RpcCore`], root [`Poa`], and the [`ListenConfig`]
/// reflecting which listeners actually came up (a listener is only
/// entered here once its accept loop is spawned, never speculatively).
pub struct Runtime {
    pub rpc_core: Arc<RpcCore>,
    pub poa: Arc<Poa>,
    pub listen: ListenConfig,
    shutdown: Arc<AtomicBool>,
}

impl Runtime {
    /// Starts every listener `config` enables and registers the default
    /// outbound connectors. Returns once every listener has bound its
    /// socket; the accept loops themselves run as detached background
    /// tasks, same as every individual transport driver's own `serve`.
    pub async fn start(config: &Config) -> Result<Runtime, Error> {
        config.validate()?;

        let rpc_core = Arc::new(RpcCore::new(config.uuid));
        let poa = rpc_core.register_poa(Poa::new("root", 0, Lifespan::Transient, IdPolicy::SystemGenerated, rpc_core.process_uuid))?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut listen = ListenConfig {
            hostname: config.hostname.clone(),
            tcp_port: None,
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        };

        if config.tcp_port != 0 {
            let listener = TcpListener::bind((config.hostname.as_str(), config.tcp_port)).await?;
            listen.tcp_port = Some(listener.local_addr()?.port());
            info!(port = listen.tcp_port, "tcp listener bound");
            tokio::spawn(nprpc_transport::tcp_serve(listener, Arc::clone(&rpc_core), DEFAULT_INACTIVITY_TIMEOUT, Arc::clone(&shutdown)));
        }

        if config.udp_port != 0 {
            let socket = Arc::new(UdpSocket::bind((config.hostname.as_str(), config.udp_port)).await?);
            listen.udp_port = Some(socket.local_addr()?.port());
            info!(port = listen.udp_port, "udp listener bound");
            let sessions: Arc<dashmap::DashMap<SocketAddr, Arc<nprpc_core::SessionCore>>> = Arc::new(dashmap::DashMap::new());
            tokio::spawn(nprpc_transport::udp_recv_loop(socket, Arc::clone(&rpc_core), sessions, DEFAULT_INACTIVITY_TIMEOUT));
        }

        if config.http_port != 0 {
            let listener = TcpListener::bind((config.hostname.as_str(), config.http_port)).await?;
            listen.http_port = Some(listener.local_addr()?.port());
            listen.ws_port = listen.http_port;
            info!(port = listen.http_port, ssl = config.http_ssl_enabled, "http listener bound");

            let static_provider: Arc<dyn nprpc_transport::StaticContentProvider> = Arc::new(nprpc_transport::NoopStaticContentProvider);
            let ssr_forwarder: Arc<dyn nprpc_transport::SsrForwarder> = Arc::new(nprpc_transport::NoopSsrForwarder);
            let router = build_router(Arc::clone(&rpc_core), static_provider, ssr_forwarder);

            if config.http_ssl_enabled {
                // Validate the certificate material fails fast rather than
                // silently serving plaintext. Terminating TLS on this
                // socket directly is TLS/HTTP framing-internals territory
                // (out of scope, see SPEC_FULL.md §9); deployments that set
                // `http_ssl_enabled` are expected to put this listener
                // behind a TLS-terminating proxy that forwards to it.
                let cert_file = config.http_cert_file.as_deref().expect("validated by Config::validate");
                let key_file = config.http_key_file.as_deref().expect("validated by Config::validate");
                build_https_server_config(cert_file, key_file)?;
                tracing::warn!("http_ssl_enabled: verified TLS material; this listener still speaks plaintext HTTP and expects a TLS-terminating proxy in front of it");
            }
            tokio::spawn(async move {
                axum::serve(listener, router).await.ok();
            });
        }

        if config.quic_port != 0 {
            let cert_file = config.quic_cert_file.as_deref().expect("validated by Config::validate");
            let key_file = config.quic_key_file.as_deref().expect("validated by Config::validate");
            let bind_addr: SocketAddr = format!("{}:{}", config.hostname, config.quic_port).parse().map_err(|e| Error::Config(format!("{e}")))?;
            let endpoint = build_quic_server_endpoint(cert_file, key_file, &[b"nprpc"], bind_addr)?;
            listen.quic_port = Some(config.quic_port);
            info!(port = config.quic_port, "quic listener bound");
            tokio::spawn(nprpc_transport::quic_serve(endpoint, Arc::clone(&rpc_core), DEFAULT_INACTIVITY_TIMEOUT, Arc::clone(&shutdown)));

            if config.http3_enabled {
                let h3_bind_addr: SocketAddr = format!("{}:{}", config.hostname, config.quic_port + 1).parse().map_err(|e| Error::Config(format!("{e}")))?;
                let h3_endpoint = build_quic_server_endpoint(cert_file, key_file, &[b"h3"], h3_bind_addr)?;
                info!(port = config.quic_port + 1, "http/3 listener bound");
                tokio::spawn(nprpc_transport::serve_h3(h3_endpoint, Arc::clone(&rpc_core), Arc::clone(&shutdown)));
            }
        }

        nprpc_transport::register_default_connectors(&rpc_core, DEFAULT_INACTIVITY_TIMEOUT);

        Ok(Runtime { rpc_core, poa, listen, shutdown })
    }

    /// Signals every stoppable accept loop (TCP/QUIC) to exit after its
    /// current `accept` call returns. WS/HTTP/UDP loops are left running
    /// as detached tasks, matching how their own `serve` functions take
    /// no stop signal today.
    pub fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
    }
}
