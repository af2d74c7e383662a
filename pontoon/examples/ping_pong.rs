//! Ping-Pong example: a real out-of-process session over stdio piping.
//!
//! The example spawns *itself* as the peer process. The host side opens a
//! session with stdio piping, sends a few synchronous pings, and closes;
//! the peer side bootstraps from its positional arguments, serves the
//! `ping` command, and exits when the channel dies.
//!
//! ```bash
//! cargo run --example ping_pong
//! ```
//!
//! Note that the peer writes its diagnostics to stderr only — its stdout is
//! the message channel, and the host tees the peer's stderr into its own
//! log, tagged with the session id.

use std::env;
use std::sync::Arc;

use pontoon::{
    BridgeConfig, Command, EventLoop, LaunchMode, PeerBootstrap, PeerController, PeerOptions,
    StepEventLoop,
};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("peer") => run_peer(&args[1..]),
        _ => run_host(),
    }
}

// ============================================================================
// Host side
// ============================================================================

fn run_host() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== Ping-Pong over a spawned peer process ===\n");

    let program = env::current_exe().expect("own executable path");
    let host_loop = Arc::new(StepEventLoop::new());

    let mut options = PeerOptions::stdio_process(program).with_property("peer.greeting", "pong");
    if let LaunchMode::StdioProcess { args, .. } = &mut options.mode {
        args.push("peer".to_string());
    }

    let controller = PeerController::new(host_loop, options);
    let host = controller.open().expect("open peer session");

    for seq in 0..5 {
        let result = host
            .sync_send(Command::new("ping").with_args(serde_json::json!({
                "seq": seq,
                "message": format!("hello from host (seq={seq})"),
            })))
            .expect("ping failed");
        println!("received: {result:?}");
    }

    println!("\nhost metrics: {:?}", host.metrics());
    controller.close();
    println!("session closed.");
}

// ============================================================================
// Peer side (spawned)
// ============================================================================

fn run_peer(args: &[String]) {
    // stdout is the channel; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bootstrap = PeerBootstrap::from_args(args.iter().cloned()).expect("bootstrap args");
    tracing::info!(session = %bootstrap.session_id, port = bootstrap.port, "peer starting");

    let event_loop = Arc::new(StepEventLoop::new());
    let loop_for_hook = Arc::clone(&event_loop);
    let _bridge = bootstrap
        .open_with(Arc::clone(&event_loop) as Arc<dyn EventLoop>, BridgeConfig::guest(), |bridge| {
            bridge.commands().register("ping", |ctx, args| {
                let seq = args["seq"].as_i64().unwrap_or(-1);
                let message = args["message"].as_str().unwrap_or("");
                // The handshake runs before any application message, so the
                // host-provided greeting is already applied here.
                let greeting = ctx
                    .bridge
                    .property("peer.greeting")
                    .unwrap_or_else(|| "pong".to_string());
                tracing::info!(seq, "serving ping");
                Ok(serde_json::json!(format!("{greeting}: {message}")))
            });
            bridge.set_death_hook(move || loop_for_hook.shutdown());
        })
        .expect("open guest bridge");

    event_loop.run();
    tracing::info!("channel closed, peer exiting");
}
