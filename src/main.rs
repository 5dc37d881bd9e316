use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use roombook::app::App;
use roombook::config::Config;
use roombook::gateway;
use roombook::observability;
use roombook::service::system_clock;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port);

    let app = App::open(config.clone(), system_clock())?;
    let jobs = app.spawn_jobs();
    let semaphore = Arc::new(Semaphore::new(config.max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  office_tz: {}", config.office_tz);
    info!("  max_connections: {}", config.max_connections);
    info!(
        "  group chat: {}",
        config
            .group_chat_id
            .map_or("none, everyone is a member".to_string(), |c| c.to_string())
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::GATEWAY_CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("transport connected from {peer}");
                metrics::gauge!(observability::GATEWAY_CONNECTIONS_ACTIVE).increment(1.0);
                let gw = app.gateway.clone();
                let dispatcher = app.dispatcher.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = gateway::process_connection(socket, gw, dispatcher).await {
                        tracing::error!("transport error from {peer}: {e}");
                    }
                    info!("transport {peer} disconnected");
                    metrics::gauge!(observability::GATEWAY_CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    for job in jobs {
        job.abort();
    }

    // Let queued updates finish; their replies still go out over the open
    // transport connection.
    app.dispatcher.close();
    info!("draining {} lanes...", app.dispatcher.active());
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain_deadline);

    loop {
        if app.dispatcher.active() == 0 {
            info!("all lanes drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                tracing::warn!("drain timeout, {} lanes still busy", app.dispatcher.active());
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("roombook stopped");
    Ok(())
}
