//! Terminal demo of the full murmur lifecycle.
//!
//! Spins up a three-node cluster over loopback UDP, watches the nodes
//! discover each other, disseminates a few state entries, then kills one
//! node abruptly and waits for the survivors to convict it.
//!
//! Run with:
//!   cargo run --example demo

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use murmur_protocol::{Murmur, Options};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

fn step(title: &str) {
    println!();
    println!("{BOLD}{CYAN}==> {title}{RESET}");
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let started = Instant::now();
    while !cond() {
        if started.elapsed() > Duration::from_secs(15) {
            println!("  {YELLOW}timed out waiting for {what}{RESET}");
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    println!("  {GREEN}{what}{RESET} {DIM}({}ms){RESET}", started.elapsed().as_millis());
}

fn node(name: &'static str, seeds: Vec<String>, log: &Arc<Mutex<Vec<String>>>) -> Murmur {
    let join_log = Arc::clone(log);
    let leave_log = Arc::clone(log);
    let mut options = Options::new()
        .with_gossip_interval(Duration::from_millis(100))
        .with_on_join(move |addr| {
            join_log.lock().push(format!("  {GREEN}+{RESET} {name} sees {addr} join"));
        })
        .with_on_leave(move |addr| {
            leave_log.lock().push(format!("  {YELLOW}-{RESET} {name} sees {addr} leave"));
        });
    if !seeds.is_empty() {
        options = options.with_seed(move || seeds.clone());
    }
    Murmur::create("127.0.0.1:0", options).expect("bind failed")
}

fn drain(log: &Arc<Mutex<Vec<String>>>) {
    for line in log.lock().drain(..) {
        println!("{line}");
    }
}

fn main() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    step("starting three nodes on loopback UDP");
    let a = node("a", Vec::new(), &log);
    let b = node("b", vec![a.bind_addr()], &log);
    let c = node("c", vec![a.bind_addr(), b.bind_addr()], &log);
    println!("  a = {}", a.bind_addr());
    println!("  b = {}", b.bind_addr());
    println!("  c = {}", c.bind_addr());

    step("waiting for full mutual discovery");
    wait_until("every node knows both others", || {
        a.peers(false).len() == 2 && b.peers(false).len() == 2 && c.peers(false).len() == 2
    });
    drain(&log);

    step("publishing state on node a");
    a.update_local("role", "frontend");
    a.update_local("zone", "eu-west-1");
    wait_until("entries visible on b and c", || {
        let role = Some(b"frontend".to_vec());
        b.lookup(&a.bind_addr(), "role") == role && c.lookup(&a.bind_addr(), "role") == role
    });
    println!(
        "  c sees a.zone = {:?}",
        c.lookup(&a.bind_addr(), "zone")
            .map(|v| String::from_utf8_lossy(&v).into_owned())
    );

    step("killing node c abruptly");
    let c_addr = c.bind_addr();
    c.shutdown().expect("shutdown failed");
    wait_until("survivors convict c", || {
        !a.peers(false).contains(&c_addr) && !b.peers(false).contains(&c_addr)
    });
    drain(&log);

    step("shutting down");
    a.shutdown().expect("shutdown failed");
    b.shutdown().expect("shutdown failed");
    println!("  done");
}
