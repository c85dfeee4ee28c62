//! AxoVault server binary.
//!
//! Stores uploaded files under a sandboxed storage root and keeps their
//! metadata in a separate record store. The main entry point loads
//! configuration, opens both stores, builds the Axum router and runs the
//! HTTP (and optional HTTPS) listeners until shutdown.

mod atomic;
mod background;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod record;
mod records;
mod sandbox;
mod service;
mod status;
mod storage;
mod tls;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::files::SharedService;
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::records::JsonRecordStore;
use crate::service::FileItemService;
use crate::storage::Storage;

shadow!(build);

/// Starts the AxoVault server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let storage_root = std::path::absolute(PathBuf::from(&args.storage_dir))?;
    let storage = Storage::new(storage_root);
    storage.ensure_root().await?;
    let records = JsonRecordStore::open(PathBuf::from(&args.records_file))
        .await
        .map_err(io::Error::other)?;
    info!(
        storage = ?storage.root_path(),
        records = ?records.path(),
        "stores ready"
    );

    let service: SharedService = Arc::new(FileItemService::new(storage, records));
    spawn_background_tasks(
        service.clone(),
        Duration::from_secs(args.reconcile_interval_secs),
        Duration::from_secs(args.orphan_grace_secs),
    );

    let app = build_router(service, &args);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(
            app.clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        );

    let https = match args.https_port {
        Some(port) => {
            let tls_config =
                tls::build_rustls_config(args.tls_cert.as_deref(), args.tls_key.as_deref(), host)
                    .await?;
            let https_addr = SocketAddr::new(host, port);
            info!("Starting HTTPS server at {}", https_addr);
            Some((https_addr, tls_config))
        }
        None => None,
    };
    let https_handle = handle.clone();
    let https_server = async move {
        match https {
            Some((addr, tls_config)) => {
                axum_server::bind_rustls(addr, tls_config)
                    .handle(https_handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => std::future::pending::<io::Result<()>>().await,
        }
    };

    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

fn build_router(service: SharedService, args: &Args) -> Router {
    let mut app = Router::new()
        .merge(files::routes())
        .route("/api/v1/healthcheck", get(status::healthcheck))
        .route("/api/version", get(status::get_version_info))
        .layer(DefaultBodyLimit::max(args.max_upload_size))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(service));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }
    app
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
