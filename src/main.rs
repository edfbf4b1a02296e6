use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use wandr_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        match panic_info.location() {
            Some(location) => error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                message,
                "panic occurred"
            ),
            None => error!(thread = thread_name, message, "panic occurred"),
        }
    }));

    // Telemetry::new() installs the subscriber.
    let config = Config::from_env().context("failed to load configuration")?;
    let bind_addr = config.http_bind();
    let registry =
        ComponentRegistry::build(config).context("failed to build component registry")?;

    let sweep_daemon = registry.spawn_sweep_daemon();
    if sweep_daemon.is_none() {
        info!("daily pending sweep disabled");
    }
    let router = build_router(registry);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;
    info!(%bind_addr, "listening");

    if let Err(error) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!(error = %error, "server exited with error");
    }
    if let Some(daemon) = sweep_daemon {
        daemon.abort();
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
