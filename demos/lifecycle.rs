//! Simulated page lifecycle against a local WebSocket server.
//!
//! Demonstrates:
//! - Building and initializing a coordinator
//! - Opening tracked connections
//! - Feeding environment events (hide, freeze, resume, offline, online)
//! - Connections re-established under the same ids
//!
//! Usage:
//!   cargo run --example lifecycle
//!   cargo run --example lifecycle -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing_subscriber::EnvFilter;

use connection_lifecycle::{
    Coordinator, EnvironmentEvent, EnvironmentHandle, Phase, RemoteError, RemoteNetwork,
    VisibilityState,
};

// ============================================================================
// Remote Network
// ============================================================================

/// Remote layer that only prints what it was asked to do.
struct PrintingRemote;

#[async_trait]
impl RemoteNetwork for PrintingRemote {
    async fn enable_network(&self) -> Result<(), RemoteError> {
        println!("        -> remote: enable network");
        Ok(())
    }

    async fn disable_network(&self) -> Result<(), RemoteError> {
        println!("        -> remote: disable network");
        Ok(())
    }
}

// ============================================================================
// Echo Server
// ============================================================================

/// Accepts WebSocket clients forever and echoes text frames.
async fn spawn_echo_server() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    Ok(format!("ws://{addr}"))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    println!("=== Connection Lifecycle ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[1] Starting echo server and coordinator...");

    let endpoint = spawn_echo_server().await?;
    let coordinator = Coordinator::builder()
        .close_timeout(Duration::from_secs(2))
        .build()?;
    coordinator.initialize(Arc::new(PrintingRemote));

    println!("    Endpoint: {endpoint}");
    println!("    ✓ Phase: {:?}\n", coordinator.current_phase());

    // ========================================================================
    // Connections
    // ========================================================================

    println!("[2] Opening tracked connections...");

    let feed = coordinator
        .create_tracked_connection(&format!("{endpoint}/feed"), None)
        .await?;
    let chat = coordinator
        .create_tracked_connection(&format!("{endpoint}/chat"), None)
        .await?;
    feed.set_message_handler(Some(Arc::new(|inbound| {
        println!("        <- feed: {inbound:?}");
    })))?;

    feed.send_text("hello")?;
    println!("    ✓ {} and {} open\n", feed.id(), chat.id());

    // ========================================================================
    // Lifecycle
    // ========================================================================

    let environment = coordinator.normalizer().attach();

    step(
        &coordinator,
        &environment,
        "[3] Page hidden",
        EnvironmentEvent::VisibilityChange {
            visibility_state: VisibilityState::Hidden,
        },
    )
    .await?;

    step(&coordinator, &environment, "[4] Page frozen", EnvironmentEvent::Freeze).await?;
    println!("    Tracked: {}", coordinator.registry().len());

    step(&coordinator, &environment, "[5] Page resumed", EnvironmentEvent::Resume).await?;
    println!("    Tracked: {}", coordinator.registry().len());
    feed.send_text("back again")?;

    step(&coordinator, &environment, "[6] Went offline", EnvironmentEvent::Offline).await?;
    step(
        &coordinator,
        &environment,
        "[7] Page visible while offline",
        EnvironmentEvent::VisibilityChange {
            visibility_state: VisibilityState::Visible,
        },
    )
    .await?;
    step(&coordinator, &environment, "[8] Back online", EnvironmentEvent::Online).await?;

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("[9] Closing...");
    feed.close().await?;
    chat.close().await?;
    coordinator.shutdown();

    let state = coordinator.state();
    println!("    Final state: {}", serde_json::to_string(&state)?);
    println!("    ✓ Done");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Emits one event and reports the phase once it has been applied.
async fn step(
    coordinator: &Coordinator,
    environment: &EnvironmentHandle,
    label: &str,
    event: EnvironmentEvent,
) -> anyhow::Result<()> {
    println!("{label}...");
    environment.emit(event)?;

    // Signals are applied on the coordinator's worker.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let phase = coordinator.current_phase();
    let marker = if phase == Phase::Active { "✓" } else { "-" };
    println!("    {marker} Phase: {phase:?}\n");
    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "connection_lifecycle=debug"
    } else {
        "connection_lifecycle=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
