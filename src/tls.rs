//! TLS configuration for the optional HTTPS listener.

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::io;
use std::net::IpAddr;
use tracing::{info, warn};

/// Loads the configured PEM pair, or generates a self-signed one for `host`.
pub async fn build_rustls_config(
    cert: Option<&str>,
    key: Option<&str>,
    host: IpAddr,
) -> io::Result<RustlsConfig> {
    match (cert, key) {
        (Some(cert), Some(key)) => RustlsConfig::from_pem_file(cert, key).await,
        (None, None) => {
            let (cert, key) = self_signed_pem(host)?;
            RustlsConfig::from_pem(cert, key).await
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "tls cert and key must be given together",
        )),
    }
}

/// Self-signed certificate kept in memory only.
fn self_signed_pem(host: IpAddr) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let cert = generate_simple_self_signed([host.to_string(), "localhost".to_string()])
        .map_err(|err| io::Error::other(err.to_string()))?;
    warn!(%host, "no tls certificate configured, using a self-signed one");
    info!("generated self-signed certificate");
    Ok((
        cert.cert.pem().into_bytes(),
        cert.key_pair.serialize_pem().into_bytes(),
    ))
}
