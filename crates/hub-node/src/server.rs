//! Serving: plain HTTP or TLS, with signal-driven graceful shutdown.

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hub_gateway::service::SHUTDOWN_TIMEOUT;
use hub_gateway::HubService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the hub until Ctrl-C or SIGTERM.
pub async fn run(hub: HubService) -> Result<()> {
    let addr = hub.config().bind_addr();
    match hub.config().server.tls.clone() {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "loading TLS certificate {} and key {}",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;
            if let Some(ca) = &tls.ca_cert_path {
                info!(ca = %ca.display(), "hub CA certificate configured");
            }
            serve_tls(hub, addr, rustls).await
        }
        None => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            hub.serve(listener, shutdown_signal())
                .await
                .context("http server")
        }
    }
}

async fn serve_tls(mut hub: HubService, addr: SocketAddr, rustls: RustlsConfig) -> Result<()> {
    hub.spawn_background();
    info!(addr = %addr, public_url = %hub.config().public_url(), "hub listening (tls)");

    let handle = Handle::new();
    let sessions = Arc::clone(hub.router().sessions());
    let token = hub.shutdown_token();
    let watcher = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = token.cancelled() => {}
        }
        sessions.close_all();
        watcher.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
    });

    let app = hub.app();
    let result = axum_server::bind_rustls(addr, rustls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("tls server");

    hub.begin_shutdown();
    hub.finish().await;
    result
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
