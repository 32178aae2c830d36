//! `conduit check`: Validate configuration and summarize routes.

use std::path::Path;

use conduit_runtime::Runtime;
use conduit_runtime::builtin::register_builtins;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    println!();
    println!("   Gateway:     {}", config.gateway.id);
    println!("   Queue:       {}", config.hub.queue_capacity);
    println!(
        "   Sessions:    ttl {}s, idle {}s, max {}",
        config.sessions.ttl_secs, config.sessions.idle_timeout_secs, config.sessions.max_sessions
    );
    println!("   Routes:      {}", config.routes.len());

    for (i, route) in config.routes.iter().enumerate() {
        let status = if route.enabled { "✅" } else { "⏸️ " };
        let delivery = route.distribution.as_deref().unwrap_or(route.strategy.as_str());
        println!(
            "   {status} [{i}] {:<24} → {} ({delivery}{}{}{})",
            route.pattern,
            route.handlers.join(", "),
            if route.exclusive { "" } else { ", non-exclusive" },
            if route.filters.is_empty() {
                String::new()
            } else {
                format!(", {} filters", route.filters.len())
            },
            if route.max_attempts > 1 {
                format!(", {} attempts", route.max_attempts)
            } else {
                String::new()
            },
        );
    }

    // Dry-run registration against the built-in handlers.
    let runtime = Runtime::build(config)?;
    register_builtins(runtime.registry());
    let errors = runtime.load_configured_routes();
    if errors.is_empty() {
        println!("\n   ✅ All routes register");
    } else {
        println!();
        for err in &errors {
            println!("   ⚠️  {err}");
        }
    }

    Ok(())
}
