//! RealMesh command-line interface
//!
//! Front end over the mesh core for poking at the stack without hardware:
//! multi-node simulations, a two-node send demo, address validation, the
//! JSON command surface, and a dump of the protocol constants.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use realmesh_core::{
    Api, MeshSimulator, Node, NodeAddress, NodeConfig, RadioConfig, SharedStore, SimConfig,
    SimRadio, HEADER_SIZE, MAX_HOP_COUNT, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "realmesh")]
#[command(author, version, about = "RealMesh LoRa mesh networking CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a line-topology mesh and report delivery statistics
    Sim {
        /// Number of nodes
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Number of broadcast messages to inject
        #[arg(short, long, default_value = "5")]
        messages: usize,

        /// Virtual seconds to run after discovery
        #[arg(short, long, default_value = "60")]
        duration: u64,
    },

    /// Run a two-node unicast exchange and print what happened
    Send {
        /// Message text
        #[arg(short, long, default_value = "hello mesh")]
        message: String,
    },

    /// Parse and validate a nodeId@subdomain address
    Address {
        /// Address in nodeId@subdomain form
        address: String,
    },

    /// Execute one JSON API request against a standalone node
    Api {
        /// Request, e.g. '{"command":"get_node_info","args":{}}'
        request: String,
    },

    /// Print protocol constants and radio defaults
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Sim {
            nodes,
            messages,
            duration,
        } => cmd_sim(nodes, messages, duration),
        Commands::Send { message } => cmd_send(&message),
        Commands::Address { address } => cmd_address(&address),
        Commands::Api { request } => cmd_api(&request),
        Commands::Info => cmd_info(),
    }
}

fn cmd_sim(nodes: usize, messages: usize, duration: u64) -> Result<()> {
    if nodes < 2 {
        return Err(anyhow!("simulation needs at least 2 nodes"));
    }

    println!("=== RealMesh Network Simulation ===");
    println!();
    println!("Nodes:    {} (line topology)", nodes);
    println!("Messages: {}", messages);
    println!("Duration: {} virtual seconds", duration);
    println!();

    let mut sim = MeshSimulator::new(SimConfig::default());
    let mut ids = Vec::with_capacity(nodes);
    for i in 0..nodes {
        let id = sim
            .add_node(&format!("node{:02}", i), "demo")
            .with_context(|| format!("node {} failed to start", i))?;
        ids.push(id);
    }
    for pair in ids.windows(2) {
        sim.link(pair[0], pair[1]);
    }

    println!("Created nodes:");
    for &id in &ids {
        println!("  - {}", sim.node(id).own_address().internal_address());
    }
    println!();

    println!("Running discovery...");
    sim.run_ms(31_000);

    for (i, &sender) in ids.iter().cycle().take(messages).enumerate() {
        sim.send_public(sender, &format!("message {}", i))
            .with_context(|| format!("broadcast {} failed", i))?;
        sim.run_ms(2_000);
    }
    sim.run_ms(duration.saturating_mul(1000));

    println!("Results:");
    println!(
        "{:<16} {:>8} {:>8} {:>10} {:>10}",
        "Node", "Sent", "Recv", "Forwarded", "Routes"
    );
    println!("{}", "-".repeat(56));
    for &id in &ids {
        let stats = sim.node(id).network_stats();
        println!(
            "{:<16} {:>8} {:>8} {:>10} {:>10}",
            sim.node(id).own_address().full_address(),
            stats.messages_sent,
            stats.messages_received,
            stats.messages_forwarded,
            stats.routing_table_size,
        );
    }

    let air = sim.stats();
    println!();
    println!(
        "Airwave: {} frames transmitted, {} delivered, {} lost",
        air.frames_transmitted, air.frames_delivered, air.frames_lost
    );
    Ok(())
}

fn cmd_send(message: &str) -> Result<()> {
    println!("=== RealMesh Two-Node Send ===");
    println!();

    let mut sim = MeshSimulator::new(SimConfig::default());
    let a = sim.add_node("alpha", "demo").context("sender failed to start")?;
    let b = sim.add_node("beta", "demo").context("receiver failed to start")?;
    sim.link(a, b);

    println!("From:    {}", sim.node(a).own_address().internal_address());
    println!("To:      {}", sim.node(b).own_address().internal_address());
    println!("Message: '{}'", message);
    println!();

    println!("Running discovery (30 virtual seconds)...");
    sim.run_ms(31_000);

    sim.send_message(a, "beta@demo", message)
        .map_err(|e| anyhow!("send failed: {e}"))?;
    sim.run_ms(2_000);

    let delivered = sim.received(b);
    match delivered.last() {
        Some((from, text, _)) => {
            println!("Delivered to beta@demo: '{}' (from {})", text, from);
            let stats = sim.node(a).network_stats();
            println!(
                "Sender stats: {} sent, {} received (includes the ACK)",
                stats.messages_sent, stats.messages_received
            );
        }
        None => println!("Message was not delivered"),
    }
    Ok(())
}

fn cmd_address(address: &str) -> Result<()> {
    match NodeAddress::parse(address) {
        Some(parsed) => {
            println!("Valid address");
            println!("  node id:   {}", parsed.node_id);
            println!("  subdomain: {}", parsed.subdomain);
            Ok(())
        }
        None => Err(anyhow!(
            "invalid address '{}': expected nodeId@subdomain, names 3-20 chars of [A-Za-z0-9_-]",
            address
        )),
    }
}

fn cmd_api(request: &str) -> Result<()> {
    let mut node = Node::new(
        Box::new(SimRadio::standalone()),
        Box::new(SharedStore::new()),
        NodeConfig::with_identity("cli", "local"),
    );
    node.begin(0)
        .map_err(|e| anyhow!("node failed to start: {e}"))?;
    // Skip straight past discovery so messaging commands are usable
    node.tick(31_000);

    let response = Api::handle_json(&mut node, request, 31_000);
    println!("{}", response);
    Ok(())
}

fn cmd_info() -> Result<()> {
    let radio = RadioConfig::default();

    println!("=== RealMesh Protocol ===");
    println!("Protocol version:  {}", PROTOCOL_VERSION);
    println!("Max packet size:   {} bytes", MAX_PACKET_SIZE);
    println!("Header size:       {} bytes", HEADER_SIZE);
    println!("Max payload:       {} bytes", MAX_PAYLOAD_SIZE);
    println!("Max hop count:     {}", MAX_HOP_COUNT);
    println!();
    println!("=== Radio Defaults ===");
    println!("Frequency:         {} MHz", radio.frequency_mhz);
    println!("Bandwidth:         {} kHz", radio.bandwidth_khz);
    println!("Spreading factor:  SF{}", radio.spreading_factor);
    println!("Coding rate:       4/{}", radio.coding_rate);
    println!("TX power:          {} dBm", radio.tx_power_dbm);
    println!("Sync word:         0x{:02X}", radio.sync_word);
    println!("Preamble:          {} symbols", radio.preamble_symbols);
    println!("CRC:               {}", if radio.crc_enabled { "on" } else { "off" });
    Ok(())
}
