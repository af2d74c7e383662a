//! End-to-end tests over the in-process loopback transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pontoon::{
    BridgeConfig, BridgeError, Command, EventLoop, MessagingBridge, StepEventLoop, loopback_pair,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct LoopThread {
    event_loop: Arc<StepEventLoop>,
    handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    fn start() -> Self {
        let event_loop = Arc::new(StepEventLoop::new());
        let handle = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };
        Self {
            event_loop,
            handle: Some(handle),
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.event_loop.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn quick(config: BridgeConfig) -> BridgeConfig {
    // Keep the pump responsive in tests.
    config.with_sync_poll_interval(Duration::from_millis(20))
}

fn bridged(host_loop: &LoopThread, guest_loop: &LoopThread) -> (MessagingBridge, MessagingBridge) {
    loopback_pair(
        host_loop.event_loop.clone(),
        guest_loop.event_loop.clone(),
        quick(BridgeConfig::host()),
        quick(BridgeConfig::guest()),
    )
}

#[test]
fn sync_send_from_loop_thread_returns_remote_value() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    guest.commands().register("add", |_ctx, args| {
        let a = args[0].as_i64().ok_or("bad lhs")?;
        let b = args[1].as_i64().ok_or("bad rhs")?;
        Ok(serde_json::json!(a + b))
    });

    // Issue the call on the host loop thread to exercise the pump path.
    let (tx, rx) = mpsc::channel();
    let caller = host.clone();
    host_loop.event_loop.invoke(Box::new(move || {
        let result = caller.sync_send(Command::new("add").with_args(serde_json::json!([2, 3])));
        tx.send(result).ok();
    }));

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("call completed")
        .expect("no bridge error");
    assert_eq!(result, Some(serde_json::json!(5)));

    host.destroy();
    guest.destroy();
}

#[test]
fn sync_send_from_foreign_thread_parks_and_completes() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    guest
        .commands()
        .register("echo", |_ctx, args| Ok(args.clone()));

    // The test thread is not the loop thread: this is the park path.
    let result = host
        .sync_send(Command::new("echo").with_args(serde_json::json!("hello")))
        .expect("sync send");
    assert_eq!(result, Some(serde_json::json!("hello")));

    host.destroy();
    guest.destroy();
}

#[test]
fn async_send_never_blocks_and_never_raises() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    let executed = Arc::new(AtomicUsize::new(0));
    {
        let executed = Arc::clone(&executed);
        guest.commands().register("slow_fail", move |_ctx, _args| {
            thread::sleep(Duration::from_millis(100));
            executed.fetch_add(1, Ordering::SeqCst);
            Err("always fails".to_string())
        });
    }

    let start = Instant::now();
    host.async_send(Command::new("slow_fail"));
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "async send must not wait for execution"
    );

    // The failure is logged on the executing side, never delivered back.
    let deadline = Instant::now() + Duration::from_secs(5);
    while executed.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "command never executed");
        thread::sleep(Duration::from_millis(10));
    }

    host.destroy();
    guest.destroy();
}

#[test]
fn async_commands_from_one_thread_execute_in_order() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        guest.commands().register("mark", move |_ctx, args| {
            let n = args.as_i64().ok_or("bad arg")?;
            seen.lock().expect("lock").push(n);
            Ok(serde_json::Value::Null)
        });
    }

    for n in 0..10 {
        host.async_send(Command::new("mark").with_args(serde_json::json!(n)));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().expect("lock").len() < 10 {
        assert!(Instant::now() < deadline, "commands did not all execute");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*seen.lock().expect("lock"), (0..10).collect::<Vec<_>>());

    host.destroy();
    guest.destroy();
}

#[test]
fn two_way_synchronous_calls_do_not_deadlock() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    // Host answers a query the guest makes *while serving* the host's call.
    host.commands()
        .register("host_name", |_ctx, _args| Ok(serde_json::json!("alpha")));

    guest.commands().register("greet", |ctx, _args| {
        let name = ctx
            .bridge
            .sync_send(Command::new("host_name"))
            .map_err(|e| e.to_string())?
            .ok_or("host name missing")?;
        Ok(serde_json::json!(format!(
            "hello, {}",
            name.as_str().unwrap_or("?")
        )))
    });

    let (tx, rx) = mpsc::channel();
    let caller = host.clone();
    host_loop.event_loop.invoke(Box::new(move || {
        tx.send(caller.sync_send(Command::new("greet"))).ok();
    }));

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reentrant call completed without deadlock")
        .expect("no bridge error");
    assert_eq!(result, Some(serde_json::json!("hello, alpha")));

    host.destroy();
    guest.destroy();
}

#[test]
fn absent_target_degrades_to_none() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    guest
        .commands()
        .register("poke", |_ctx, _args| Ok(serde_json::json!("poked")));

    // Target id 9999 was never registered on the guest.
    let result = host
        .sync_send(Command::new("poke").with_target(9999))
        .expect("sync send");
    assert_eq!(result, None);

    host.destroy();
    guest.destroy();
}

#[test]
fn remote_failure_surfaces_as_error() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    guest
        .commands()
        .register("explode", |_ctx, _args| Err("boom".to_string()));

    match host.sync_send(Command::new("explode")) {
        Err(BridgeError::Remote(failure)) => assert_eq!(failure, "boom"),
        other => panic!("expected remote failure, got {other:?}"),
    }

    // An unknown kind is a failure too, not a hang.
    assert!(matches!(
        host.sync_send(Command::new("no_such_kind")),
        Err(BridgeError::Remote(_))
    ));

    host.destroy();
    guest.destroy();
}

#[test]
fn destroy_is_idempotent_and_later_sends_are_loud() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    host.destroy();
    host.destroy();
    assert!(!host.is_alive());
    assert!(!host.is_open());

    assert!(matches!(
        host.sync_send(Command::new("anything")),
        Err(BridgeError::InterfaceClosed)
    ));

    guest.destroy();
}

#[test]
fn crash_releases_every_parked_and_pumping_waiter() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    // A handler slow enough that every call is still outstanding when the
    // channel dies.
    guest.commands().register("stall", |_ctx, _args| {
        thread::sleep(Duration::from_secs(30));
        Ok(serde_json::Value::Null)
    });

    let (tx, rx) = mpsc::channel();

    // Three foreign threads park on slots.
    for _ in 0..3 {
        let caller = host.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            tx.send(caller.sync_send(Command::new("stall"))).ok();
        });
    }

    // And the host loop thread blocks in the pump.
    {
        let caller = host.clone();
        let tx = tx.clone();
        host_loop.event_loop.invoke(Box::new(move || {
            tx.send(caller.sync_send(Command::new("stall"))).ok();
        }));
    }

    thread::sleep(Duration::from_millis(100));
    guest.destroy(); // kills the shared loopback channel

    let deadline = Duration::from_secs(5);
    for _ in 0..4 {
        let outcome = rx.recv_timeout(deadline).expect("waiter released");
        assert_eq!(outcome.expect("benign outcome"), None);
    }

    assert!(!host.is_alive());
    host.destroy();
}

#[test]
fn death_hook_fires_exactly_once() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    let deaths = Arc::new(AtomicUsize::new(0));
    {
        let deaths = Arc::clone(&deaths);
        host.set_death_hook(move || {
            deaths.fetch_add(1, Ordering::SeqCst);
        });
    }

    guest.destroy();

    let deadline = Instant::now() + Duration::from_secs(5);
    while deaths.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "death never detected");
        thread::sleep(Duration::from_millis(10));
    }

    // A later explicit destroy must not fire it again.
    host.destroy();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(deaths.load(Ordering::SeqCst), 1);
}

#[test]
fn metrics_count_traffic() {
    init_tracing();
    let host_loop = LoopThread::start();
    let guest_loop = LoopThread::start();
    let (host, guest) = bridged(&host_loop, &guest_loop);

    guest
        .commands()
        .register("echo", |_ctx, args| Ok(args.clone()));

    host.sync_send(Command::new("echo").with_args(serde_json::json!(1)))
        .expect("sync send");

    let host_metrics = host.metrics();
    let guest_metrics = guest.metrics();
    assert!(host_metrics.messages_sent >= 1);
    assert!(host_metrics.messages_received >= 1);
    assert!(guest_metrics.commands_executed >= 1);

    host.destroy();
    guest.destroy();
}
