//! Subcommand implementations.

use crate::cli::{Cli, Operation};
use crate::demo::{self, CALCULATOR_ID};
use crate::ui;
use anyhow::{Context, Result};
use parley_rmi::{load_config, CapabilityRegistry, Closure, InvocationSpace, RmiError, Value};
use parley_types::{NodeConfig, ParleyConfig};
use parley_wire::{PeerConfig, PeerNode, WireError};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Run an async command on a fresh runtime.
pub fn run(command: impl Future<Output = Result<()>>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(command)
}

pub struct CallArgs {
    pub op: Operation,
    pub a: i64,
    pub b: i64,
    pub connect: Option<String>,
    pub watch: bool,
    pub json: bool,
}

fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .with_context(|| format!("Invalid socket address: {addr}"))
}

/// A space with the demo capabilities registered.
fn demo_space(config: &ParleyConfig) -> Result<InvocationSpace> {
    let space = InvocationSpace::new(config.space.clone());
    for capability in demo::capabilities() {
        space.register(&capability)?;
    }
    Ok(space)
}

fn peer_config(node: &NodeConfig, listen_addr: SocketAddr, space: &InvocationSpace, outbound_queue: usize) -> PeerConfig {
    let defaults = PeerConfig::default();
    PeerConfig {
        listen_addr,
        node_name: node
            .node_name
            .clone()
            .unwrap_or_else(|| format!("parley-{}", uuid::Uuid::new_v4().simple())),
        fingerprint: if node.check_fingerprint {
            space.fingerprint()
        } else {
            String::new()
        },
        outbound_queue: if outbound_queue == 0 {
            defaults.outbound_queue
        } else {
            outbound_queue
        },
    }
}

pub async fn serve(config_path: Option<PathBuf>, listen: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref());
    let listen_addr = parse_addr(listen.as_deref().unwrap_or(&config.node.listen_addr))?;
    let space = demo_space(&config)?;
    space.host_with_id(CALCULATOR_ID, demo::calculator_service())?;

    let peer = peer_config(&config.node, listen_addr, &space, config.space.outbound_queue);
    let (node, accept) = PeerNode::start(peer, Arc::new(space.clone()))
        .await
        .context("Failed to start peer node")?;

    ui::section("Serving calculator");
    ui::kv("Listen", &node.local_addr().to_string());
    ui::kv("Node", node.node_name());
    ui::kv("Object", &CALCULATOR_ID.to_string());
    ui::kv("Fingerprint", &space.fingerprint());
    ui::hint("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C")?;
    info!(connections = space.connection_count(), "Shutting down");
    space.shutdown();
    accept.abort();
    ui::success("Stopped");
    Ok(())
}

pub async fn call(config_path: Option<PathBuf>, args: CallArgs) -> Result<()> {
    let config = load_config(config_path.as_deref());
    let target = parse_addr(args.connect.as_deref().unwrap_or(&config.node.listen_addr))?;
    let space = demo_space(&config)?;

    let local = SocketAddr::from(([127, 0, 0, 1], 0));
    let peer = peer_config(&config.node, local, &space, config.space.outbound_queue);
    let (node, accept) = PeerNode::start(peer, Arc::new(space.clone()))
        .await
        .context("Failed to start peer node")?;

    let conn = match node.connect(target).await {
        Ok(conn) => conn,
        Err(WireError::FingerprintMismatch { .. }) => {
            ui::error_with_fix(
                "Peer registered different capabilities",
                "run the same parley version on both nodes",
            );
            anyhow::bail!("Handshake with {target} refused");
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to connect to {target}")),
    };
    let calculator = space.create_remote_with_id(&conn, CALCULATOR_ID, "Calculator")?;

    if args.watch {
        let listener = Closure::named("cli-listener", |call| {
            ui::kv("Notified", &format!("{} = {}", call.str(0)?, call.i64(1)?));
            Ok(Value::null())
        });
        calculator
            .call("subscribe", vec![Value::object(listener)])
            .await
            .context("Failed to subscribe")?;
    }

    let outcome = calculator
        .call(args.op.method(), vec![args.a.into(), args.b.into()])
        .await;
    space.shutdown();
    accept.abort();

    match outcome {
        Ok(value) => {
            let result = value.as_i64().unwrap_or_default();
            if args.json {
                let out = serde_json::json!({
                    "operation": args.op.method(),
                    "a": args.a,
                    "b": args.b,
                    "result": result,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                ui::success(&format!("{} {} {} = {result}", args.op.method(), args.a, args.b));
            }
            Ok(())
        }
        Err(RmiError::Remote(failure)) if args.json => {
            let out = serde_json::json!({
                "operation": args.op.method(),
                "error": failure.message(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Err(e) => Err(e).context("Call failed"),
    }
}

/// Print the demo registration: capabilities, method ids and fingerprint.
pub fn info(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref());
    let registry = CapabilityRegistry::new(config.space.default_policy.clone());
    for capability in demo::capabilities() {
        registry.register(&capability)?;
    }

    for name in registry.capabilities() {
        let Some(capability) = registry.capability(&name) else {
            continue;
        };
        let kind = if capability.is_functional() { " (functional)" } else { "" };
        ui::section(&format!("{name}{kind}"));
        for method in capability.methods() {
            ui::kv(&method.id.to_string(), &method.name);
        }
    }
    ui::kv("Fingerprint", &registry.fingerprint());
    ui::kv("Listen", &config.node.listen_addr);
    Ok(())
}

pub fn completion(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "parley", &mut std::io::stdout());
}
