use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use scenecraft_api::app::{build_app, AppServices};
use scenecraft_api::config::ServerConfig;
use scenecraft_engine::{
    BlocklistPolicy, Collaborators, DirectoryArtifactStore, EngineConfig, GenerationEngine,
    RemoteBackend,
};

fn main() -> anyhow::Result<()> {
    scenecraft_observability::init();

    let server = ServerConfig::from_env().context("server configuration")?;
    let config = EngineConfig::from_env().context("engine configuration")?;

    // The blocking HTTP client must be built and dropped outside the async runtime.
    let backend = Arc::new(RemoteBackend::new(&server.backend_url, server.device.clone())?);
    match backend.refresh() {
        Ok(report) => tracing::info!(
            backend = %backend.base_url(),
            device = %report.name,
            total_mib = report.total_units,
            available_mib = report.available_units,
            "synthesis backend reachable"
        ),
        Err(e) => tracing::warn!(
            backend = %backend.base_url(),
            error = %e,
            "synthesis backend not reachable yet; using configured device capacity"
        ),
    }

    let artifacts = Arc::new(
        DirectoryArtifactStore::open(&config.output_dir)
            .with_context(|| format!("opening {}", config.output_dir.display()))?,
    );
    let policy = Arc::new(BlocklistPolicy::from_csv(&server.content_blocklist));
    let sweep_interval = config.sweep_interval;

    let engine = Arc::new(GenerationEngine::new(config, backend.clone(), policy));
    let worker = engine.spawn_worker(backend.clone(), Collaborators::new(artifacts.clone()))?;

    let services = Arc::new(AppServices::new(engine, artifacts));
    services.attach_worker(worker);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(server.bind_addr(), services.clone(), sweep_interval))?;
    drop(runtime);

    services.shutdown_worker();
    drop(backend);
    Ok(())
}

async fn serve(
    addr: SocketAddr,
    services: Arc<AppServices>,
    sweep_interval: Duration,
) -> anyhow::Result<()> {
    let housekeeping = services.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let services = housekeeping.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || services.housekeeping()).await {
                tracing::error!(error = %e, "housekeeping task failed");
            }
        }
    });

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
