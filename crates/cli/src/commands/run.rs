//! `conduit run`: Start the full runtime.

use std::path::Path;

use conduit_runtime::Runtime;
use conduit_runtime::builtin::register_builtins;
use tracing::{info, warn};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🔀 Conduit — Starting runtime");
    println!("   Gateway:   {}", config.gateway.id);
    println!("   Queue:     {} events", config.hub.queue_capacity);
    println!("   Session TTL: {}s", config.sessions.ttl_secs);
    println!("   Routes:    {}", config.routes.len());

    let runtime = Runtime::build(config)?;
    register_builtins(runtime.registry());

    let total = runtime.config().routes.len();
    let errors = runtime.load_configured_routes();
    for err in &errors {
        warn!("Route load error: {err}");
    }
    info!(loaded = total - errors.len(), total, "Routes loaded from config");

    runtime.start()?;
    println!("   ✅ Running — press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    println!();
    info!("Shutdown requested");
    runtime.shutdown().await;

    let status = runtime.status();
    println!("   Routed:    {}", status.router.total_routed);
    println!("   Sessions:  {} created", status.gateway.sessions.created);
    println!("   Events:    {} emitted", status.hub.emitted);
    Ok(())
}
