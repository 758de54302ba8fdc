//! Random number client.
//!
//! Connects to an event-bus bridge, subscribes to one address and prints
//! every number published there. Prints `Closed` once the bridge goes away.
//!
//! Run against the companion server:
//!   cargo run -p eventbridge-randomnumber-server
//!   cargo run -p eventbridge-randomnumber -- --url http://localhost:9999/randomnumber
//!
//! Connection options can also come from a JSON file:
//!   cargo run -p eventbridge-randomnumber -- --config bus.json
//! where `bus.json` holds e.g. `{"ping_interval_ms": 2000, "headers": {"token": "abc"}}`.
//! Flags given on the command line override the file.

mod app;
mod view;

use anyhow::Context;
use clap::Parser;
use eventbridge_client::{Address, BusOptions, EventBus, WebSocketConnector};
use eventbridge_core::Dispatcher;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use view::{Surface, TerminalSurface};

#[derive(Debug, Parser)]
#[command(name = "randomnumber", about = "Render numbers published on an event-bus address")]
struct Args {
    /// Bridge URL. `http(s)` URLs are treated as SockJS prefixes.
    #[arg(
        long,
        env = "RANDOMNUMBER_URL",
        default_value = "http://localhost:9999/randomnumber"
    )]
    url: String,

    /// Address to subscribe to.
    #[arg(long, env = "RANDOMNUMBER_ADDRESS", default_value = "randomnumber")]
    address: Address,

    /// JSON file with bus options (`ping_interval_ms`, `connect_timeout_ms`, `headers`).
    #[arg(long, env = "RANDOMNUMBER_CONFIG")]
    config: Option<PathBuf>,

    /// Keep-alive ping interval; 0 disables pings. Defaults to 5000.
    #[arg(long)]
    ping_interval_ms: Option<u64>,

    /// Connection timeout; 0 waits forever. Defaults to 10000.
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

/// Layer command-line overrides on top of the config file, if any.
fn bus_options(args: &Args, config: Option<&str>) -> anyhow::Result<BusOptions> {
    let mut options = match config {
        Some(text) => serde_json::from_str::<BusOptions>(text).context("Invalid bus options")?,
        None => BusOptions::default(),
    };
    if let Some(ms) = args.ping_interval_ms {
        options = options.with_ping_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = args.connect_timeout_ms {
        options = options.with_connect_timeout((ms > 0).then(|| Duration::from_millis(ms)));
    }
    Ok(options)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("randomnumber=info".parse()?)
                .add_directive("eventbridge_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };
    let options = bus_options(&args, config.as_deref())?;

    let dispatcher = Rc::new(Dispatcher::new());
    let surface: Rc<RefCell<dyn Surface>> = Rc::new(RefCell::new(TerminalSurface::stdout()));

    let mut bus = EventBus::open(&args.url, options, &WebSocketConnector)?;
    app::install(&mut bus, &dispatcher, surface, args.address);
    bus.run().await;

    Ok(())
}
