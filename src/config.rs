//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 512 * 1024 * 1024;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_ORPHAN_GRACE_SECS: u64 = 60 * 60;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-vault", version = VERSION_INFO, about = "AxoVault file item server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "AXO_STORAGE_DIR",
        default_value = ".axo/uploads",
        help = "Storage root for uploaded files (made absolute, created if missing)"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'r',
        long,
        env = "AXO_RECORDS_FILE",
        default_value = ".axo/records.json",
        help = "JSON file holding file item metadata"
    )]
    pub records_file: String,
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_HTTP_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "AXO_HTTPS_PORT",
        help = "HTTPS port (HTTPS is disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "AXO_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "AXO_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "AXO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "AXO_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload request size in bytes"
    )]
    pub max_upload_size: usize,
    #[arg(
        long,
        env = "AXO_RECONCILE_INTERVAL_SECS",
        default_value_t = DEFAULT_RECONCILE_INTERVAL_SECS,
        help = "Interval of the pending record and temp file sweep in seconds (0 to disable)"
    )]
    pub reconcile_interval_secs: u64,
    #[arg(
        long,
        env = "AXO_ORPHAN_GRACE_SECS",
        default_value_t = DEFAULT_ORPHAN_GRACE_SECS,
        help = "Age a pending record or temp file must reach before it is swept"
    )]
    pub orphan_grace_secs: u64,
    #[arg(
        long,
        env = "AXO_LOG_LEVEL",
        default_value = "info",
        help = "Log filter used when RUST_LOG is not set"
    )]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_https() {
        let args = Args::try_parse_from(["axo-vault"]).expect("parse defaults");
        assert_eq!(args.http_port, 8000);
        assert!(args.https_port.is_none());
        assert_eq!(args.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "axo-vault",
            "--storage-dir",
            "/srv/uploads",
            "--https-port",
            "8443",
            "--reconcile-interval-secs",
            "0",
        ])
        .expect("parse flags");
        assert_eq!(args.storage_dir, "/srv/uploads");
        assert_eq!(args.https_port, Some(8443));
        assert_eq!(args.reconcile_interval_secs, 0);
    }
}
