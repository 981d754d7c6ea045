//! In-process host bridge.
//!
//! Demonstrates:
//! - Registering async command handlers on an `InProcessBridge`
//! - Selecting the local transport through `TransportFactory`
//! - Typed commands and typed event listeners
//!
//! Usage:
//!   cargo run --example 001_local_bridge
//!   cargo run --example 001_local_bridge -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use backend_transport::{
    Environment, InProcessBridge, Result, TransportExt, TransportFactory,
};
use common::Args;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
struct Rename<'a> {
    id: u32,
    title: &'a str,
}

#[derive(Debug, Deserialize)]
struct Session {
    id: u32,
    title: String,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== 001: Local Bridge ===\n");

    // ========================================================================
    // Host side
    // ========================================================================

    println!("[1] Registering host handlers...");

    let bridge = Arc::new(InProcessBridge::new());
    {
        let events = Arc::clone(&bridge);
        bridge.register("sessions.rename", move |payload| {
            let events = Arc::clone(&events);
            async move {
                events.emit("sessions-changed", &json!({"count": 1}));
                Ok(payload)
            }
        });
    }

    println!("    ✓ Handlers ready\n");

    // ========================================================================
    // Client side
    // ========================================================================

    println!("[2] Creating transport...");

    let factory = TransportFactory::new(Environment::hosted(bridge));
    let transport = factory.transport()?;

    println!("    ✓ Kind: {}\n", transport.kind());

    println!("[3] Listening for sessions-changed...");

    let subscription = transport.on_event("sessions-changed", Arc::new(|payload| {
        println!("    ← sessions-changed {payload}");
    }));

    println!("[4] Invoking sessions.rename...");

    let session: Session = transport
        .invoke_as("sessions.rename", &Rename { id: 7, title: "Renamed" })
        .await?;

    println!("    ✓ Session {} is now '{}'\n", session.id, session.title);

    subscription.unsubscribe();
    println!("=== Done ===");
    Ok(())
}
