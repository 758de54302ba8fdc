//! Random number bridge server.
//!
//! A stand-in for a real event-bus bridge: accepts websocket clients on any
//! path, honours `register`/`unregister`/`ping`/`publish`/`send`, and
//! publishes a random number to one address on a fixed interval.
//!
//!   cargo run -p eventbridge-randomnumber-server -- --port 9999 --interval-ms 1000

mod server;

use clap::Parser;
use eventbridge_core::Address;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "randomnumber-server", about = "Publish random numbers over an event-bus bridge")]
struct Args {
    #[arg(long, default_value_t = 9999)]
    port: u16,

    /// Address numbers are published to.
    #[arg(long, default_value = "randomnumber")]
    address: Address,

    #[arg(long, default_value_t = 1_000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("randomnumber_server=info".parse()?),
        )
        .init();

    let args = Args::parse();
    if args.interval_ms == 0 {
        anyhow::bail!("--interval-ms must be positive");
    }
    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();

    tracing::info!("Publishing to '{}' every {}ms", args.address, args.interval_ms);

    server::run(addr, args.address, Duration::from_millis(args.interval_ms)).await
}
