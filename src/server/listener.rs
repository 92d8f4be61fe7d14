use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::server::service::ProxyService;

/// Compiles the proxy rules, binds the listen address and serves forever.
///
/// Rule errors abort before anything is bound.
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let service = Arc::new(ProxyService::from_config(cfg)?);

    for rule in service.rules().rules() {
        info!(
            prefix = rule.prefix(),
            target = %rule.target(),
            change_origin = rule.change_origin(),
            rewrite = ?rule.rewrite(),
            "Proxy rule loaded"
        );
    }

    let listener = TcpListener::bind(&cfg.server.listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, service).await
}

/// Pause after an accept error that is not tied to a single connection,
/// such as running out of file descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop. Every connection runs on its own task.
///
/// Accept errors are logged and retried, so live sessions are never torn
/// down by a failing listener.
pub async fn serve(listener: TcpListener, service: Arc<ProxyService>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let backoff = accept_backoff(&e);
                warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "Accept failed");
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, peer, service);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

/// How long to wait before accepting again after `error`. Errors that only
/// concern the connection being accepted retry at once.
pub fn accept_backoff(error: &io::Error) -> Duration {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}
