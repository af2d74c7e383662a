//! Calculator example: an in-process session between two event loops.
//!
//! Two `StepEventLoop`s stand in for two UI toolkits. The guest side
//! registers arithmetic commands; the host side calls them synchronously
//! and prints the results.
//!
//! ```bash
//! cargo run --example calculator
//! ```

use std::sync::Arc;
use std::thread;

use pontoon::{Command, PeerController, PeerOptions, StepEventLoop};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // One loop per side, each driven by its own thread.
    let host_loop = Arc::new(StepEventLoop::new());
    let guest_loop = Arc::new(StepEventLoop::new());
    let host_driver = {
        let host_loop = Arc::clone(&host_loop);
        thread::spawn(move || host_loop.run())
    };
    let guest_driver = {
        let guest_loop = Arc::clone(&guest_loop);
        thread::spawn(move || guest_loop.run())
    };

    let controller = PeerController::new(
        host_loop.clone(),
        PeerOptions::in_process(guest_loop.clone()).with_property("calc.precision", "i64"),
    );

    let host = controller.open().expect("open session");
    let guest = controller.guest_bridge().expect("in-process guest");

    guest.commands().register("add", |_ctx, args| {
        let a = args[0].as_i64().ok_or("bad lhs")?;
        let b = args[1].as_i64().ok_or("bad rhs")?;
        Ok(serde_json::json!(a + b))
    });
    guest.commands().register("mul", |_ctx, args| {
        let a = args[0].as_i64().ok_or("bad lhs")?;
        let b = args[1].as_i64().ok_or("bad rhs")?;
        Ok(serde_json::json!(a * b))
    });

    println!("=== Calculator over an in-process bridge ===\n");
    for (op, a, b) in [("add", 2, 3), ("mul", 6, 7), ("add", 40, 2)] {
        let result = host
            .sync_send(Command::new(op).with_args(serde_json::json!([a, b])))
            .expect("call failed");
        println!("{op}({a}, {b}) = {result:?}");
    }

    println!("\nguest saw property calc.precision = {:?}", guest.property("calc.precision"));
    println!("host metrics: {:?}", host.metrics());

    controller.close();
    host_loop.shutdown();
    guest_loop.shutdown();
    host_driver.join().ok();
    guest_driver.join().ok();
}
