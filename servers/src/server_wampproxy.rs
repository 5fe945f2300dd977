//! # WAMP Protocol-Bridge Proxy
//!
//! Accepts lightweight JSON-framed WebSocket requests from downstream
//! clients and forwards them as calls to a WAMP router over a second
//! WebSocket connection, hiding WAMP's session management, realm-joining,
//! and introspection behind a one-shot request/response channel.
//!
//! ## Core Responsibilities:
//! - **Realm-Multiplexed Sessions:** Maintains at most one upstream WAMP
//!   session per realm (`wampproxy::registry`), reconnecting through
//!   capped exponential backoff (`wampproxy::transport`) when the router
//!   drops.
//! - **Request Dispatch:** Validates and bridges downstream JSON requests
//!   to upstream WAMP calls (`wampproxy::dispatcher`).
//! - **Downstream Listener:** Accepts WebSocket upgrades, enforces the
//!   connection cap, and writes back `[status, payload]` replies
//!   (`wampproxy::listener`).

mod wampproxy;

use std::time::Duration;

use tokio_graceful::Shutdown;

use wampproxy::config::{self, Config};
use wampproxy::dispatcher::Dispatcher;
use wampproxy::logging;
use wampproxy::registry::SessionRegistry;
use wampproxy::transport;

#[tokio::main]
async fn main() {
    let cfg = config::load_config();

    if let Err(e) = logging::setup_logging(&cfg.log_dir, cfg.debug) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cfg).await {
        log::error!("fatal configuration error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    // Fatal start-up validation: bad URIs or missing mTLS material abort
    // before any reconnect loop is ever started.
    let (addr, path) = wampproxy::listener::parse_listener_uri(&cfg.server)
        .map_err(|e| anyhow::anyhow!(e))?;
    transport::validate_start_up(
        &cfg.router,
        cfg.client_key.as_deref(),
        cfg.client_certificate.as_deref(),
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    log::info!(
        "wampproxy starting: downstream {} (max {} connections), upstream router {}",
        cfg.server,
        cfg.max_connections,
        cfg.router
    );

    let registry = SessionRegistry::new(cfg.router.clone());
    let dispatcher = Dispatcher::new(registry.clone(), cfg.call_timeout());

    let shutdown: Shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| async move {
        if let Err(e) = wampproxy::listener::serve(
            addr,
            &path,
            dispatcher,
            cfg.max_connections,
            async move { guard.cancelled().await },
        )
        .await
        {
            log::error!("downstream listener stopped with error: {e}");
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => log::info!("shutdown: graceful after {:.1}s", elapsed.as_secs_f64()),
        Err(e) => log::warn!("shutdown: forced after timeout: {e}"),
    }

    registry.shutdown();

    Ok(())
}
