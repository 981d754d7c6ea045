//! Remote transport with a status indicator.
//!
//! Demonstrates:
//! - Resolving `RemoteConfig` from a query string and the environment
//! - Persisting overrides to a JSON file
//! - Watching connection status with `StatusMonitor`
//!
//! Usage:
//!   cargo run --example 002_remote_status -- --query="server=http://localhost:3000"
//!   cargo run --example 002_remote_status -- --query="server=http://localhost:3000&transport=http"
//!   cargo run --example 002_remote_status -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use backend_transport::{
    ConfigSources, Environment, FileOverrideStore, Overrides, RemoteConfig, StatusMonitor,
    TransportFactory,
};
use common::Args;
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const OVERRIDES_PATH: &str = "./demo_overrides.json";
const ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    println!("=== 002: Remote Status ===\n");

    // ========================================================================
    // Resolve config
    // ========================================================================

    println!("[1] Resolving remote config...");

    let store = FileOverrideStore::new(OVERRIDES_PATH);
    let mut sources =
        ConfigSources::new(Url::parse(ORIGIN)?).with_env(Overrides::from_env());
    if let Some(query) = args.query {
        sources = sources.with_query(query);
    }
    let remote = RemoteConfig::resolve(&sources, &store).context("resolving remote config")?;

    println!("    WS:   {}", remote.ws_url);
    println!("    HTTP: {}", remote.http_base_url);
    println!("    Mode: {}\n", remote.transport);

    // ========================================================================
    // Watch status
    // ========================================================================

    let factory = TransportFactory::new(Environment::default()).with_remote(remote);
    let transport = factory.transport().context("creating transport")?;

    println!("[2] Watching {} transport status for 10s...", transport.kind());

    let mut monitor = StatusMonitor::new(transport.as_ref());
    println!("    • {}", monitor.current());

    let watch = async {
        while let Some(status) = monitor.changed().await {
            println!("    • {status}");
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(10), watch).await;

    if transport.is_connected() {
        println!("\n[3] Invoking ping...");
        match transport.invoke("ping", None, false).await {
            Ok(value) => println!("    ✓ {value}"),
            Err(e) => println!("    ✗ {e}"),
        }
    }

    transport.dispose();
    println!("\n=== Done ===");
    Ok(())
}
