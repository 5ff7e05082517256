// modelyard/crates/modelyard/src/main.rs

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use modelyard::{Config, RuntimeSupervisor, StateSink};
    use std::sync::Arc;

    dotenvy::dotenv().ok();
    modelyard::telemetry::init_tracing();

    let cfg = Config::from_env()?;
    cfg.print_config();

    let info = modelyard::detect_system_info();
    tracing::info!(
        "Host: {} | {:.1} GB RAM | {} cores | {} MiB VRAM | tier {}",
        info.os,
        info.total_ram_gb,
        info.cpu_cores,
        info.vram_mb,
        info.tier
    );

    let supervisor = match cfg.state_db.clone() {
        Some(db) => Arc::new(RuntimeSupervisor::with_sink(cfg, StateSink::new(db))),
        None => Arc::new(RuntimeSupervisor::new(cfg)),
    };
    supervisor.start_idle_evictor();

    tracing::info!("modelyard supervisor running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    // Orderly shutdown is the only path that guarantees no orphaned
    // backends survive.
    tracing::info!("Shutting down: stopping all running backends");
    supervisor.stop_all().await;
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
