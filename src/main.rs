use std::env;
use std::path::PathBuf;

use anyhow::Context;
use calloop::EventLoop;
use clap::Parser;
use smithay::reexports::wayland_server::Display;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wlr_output_management::server::State;
use wlr_output_management_config::Config;

const DEFAULT_LOG_FILTER: &str = "wlr_output_management=debug,info";

/// Headless Wayland server exposing virtual outputs through wlr-output-management.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Name of the Wayland socket to create instead of the first free wayland-N.
    #[arg(short, long)]
    socket: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    let _client = tracy_client::Client::start();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .inspect_err(|err| warn!("{err:?}"))
            .unwrap_or_default(),
        None => Config::default(),
    };

    let mut event_loop = EventLoop::try_new().context("error creating event loop")?;
    let display = Display::new().context("error creating display")?;
    let mut state = State::new(&config, &mut event_loop, display, cli.socket.as_deref())?;

    info!("listening on Wayland socket: {:?}", state.socket_name);

    event_loop
        .run(None, &mut state, |state| state.refresh_and_flush_clients())
        .context("error running event loop")?;

    state.shutdown();
    Ok(())
}
