//! Seat dispatch server over in-memory backends.
//!
//! Reads `.env` and `SEAT_DISPATCH_*` settings, runs every engine loop on a runtime with one
//! worker per CPU and serves seat sockets plus the REST endpoints until Ctrl-C.

use anyhow::Context;
use seat_dispatch::builders::build_in_memory_engine;
use seat_dispatch::config::EngineConfig;
use seat_dispatch::core::AppResult;
use seat_dispatch::runtime::TokioSpawner;
use seat_dispatch::util::init_tracing;

fn main() -> AppResult<()> {
    init_tracing("seat_dispatch=info");
    let cfg = EngineConfig::from_env().map_err(anyhow::Error::msg)?;
    let spawner = TokioSpawner::with_default_threads().context("building runtime")?;
    spawner.handle().block_on(serve(cfg, &spawner))
}

async fn serve(cfg: EngineConfig, spawner: &TokioSpawner) -> AppResult<()> {
    let addr = cfg.listen_addr;
    let (engine, backends) = build_in_memory_engine(cfg)?;
    engine.start(spawner);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        push_queue = backends.push_queue.name(),
        cdr_queue = backends.cdr_queue.name(),
        "seat dispatch listening"
    );
    axum::serve(listener, engine.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown();
    Ok(())
}
