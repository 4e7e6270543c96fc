//! TLS material loading for the HTTPS and QUIC listeners. Neither
//! `nprpc-transport` driver owns certificate handling itself — `quic::serve`
//! and `quic::serve_h3` both take an already-configured `quinn::Endpoint` —
//! so building the `rustls`/`quinn` server config from `Config`'s
//! `*_cert_file`/`*_key_file` paths is the facade's job.

use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::Error;

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| Error::Config(format!("reading certificate file '{path}': {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("parsing certificate file '{path}': {e}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, Error> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| Error::Config(format!("reading private key file '{path}': {e}")))
}

/// Builds a `rustls::ServerConfig` for the HTTPS listener from
/// `http_cert_file`/`http_key_file`. `http_dhparams_file` has no
/// equivalent in `rustls`'s cipher suite selection and is accepted but
/// unused, matching how the wider ecosystem has moved off explicit DH
/// parameter files in favor of curve-based key exchange.
pub fn build_https_server_config(cert_file: &str, key_file: &str) -> Result<Arc<rustls::ServerConfig>, Error> {
    let certs = load_cert_chain(cert_file)?;
    let key = load_private_key(key_file)?;
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("building TLS server config: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Builds a `quinn::Endpoint` bound to `bind_addr`, configured with
/// `quic_cert_file`/`quic_key_file` and the given ALPN protocol list
/// (`b"nprpc"` for the raw RPC listener, `b"h3"` for the HTTP/3 one).
pub fn build_quic_server_endpoint(
    cert_file: &str,
    key_file: &str,
    alpn_protocols: &[&[u8]],
    bind_addr: std::net::SocketAddr,
) -> Result<quinn::Endpoint, Error> {
    let certs = load_cert_chain(cert_file)?;
    let key = load_private_key(key_file)?;
    let mut rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("building QUIC TLS config: {e}")))?;
    rustls_config.alpn_protocols = alpn_protocols.iter().map(|p| p.to_vec()).collect();

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(rustls_config)
        .map_err(|e| Error::Config(format!("QUIC requires TLS 1.3: {e}")))?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    quinn::Endpoint::server(server_config, bind_addr).map_err(Error::Io)
}
