use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scene_proto::{Action, Command};
use serde_json::{Map, Value};
use tokio::time::Duration;
use tracing::debug;

use scene_relay::client::RelayClient;
use scene_relay::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "scene-relay")]
#[command(about = "Scene command relay server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (default when no command is given)
    Serve(ServeArgs),

    /// Send one command over the duplex channel and print the response
    Send {
        /// Relay URL (e.g., ws://localhost:9000)
        #[arg(short, long, default_value = "ws://localhost:9000")]
        url: String,

        /// Action name: rotate, zoom, focus, reset, highlight or any custom name
        action: String,

        /// Lock target for the command
        #[arg(short, long)]
        target: Option<String>,

        /// Parameters as a JSON object, e.g. '{"direction":"left","angle":45}'
        #[arg(short, long)]
        params: Option<String>,

        /// Seconds to wait for the response
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address, overrides PORT
    #[arg(long, env = "SCENE_RELAY_ADDR")]
    pub addr: Option<std::net::SocketAddr>,

    /// DevTools page WebSocket URL
    #[arg(long, env = "DEVTOOLS_WS_URL")]
    pub devtools_url: Option<String>,

    /// Report exhausted strategy lists as failures
    #[arg(long)]
    pub strict: bool,

    /// Require an init handshake before commands
    #[arg(long)]
    pub require_init: bool,

    /// Run against an in-memory scene instead of a browser
    #[arg(long)]
    pub simulate: bool,
}

impl ServeArgs {
    /// Flags win over the environment; boolean flags can only switch a
    /// feature on.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = self.addr {
            config.bind_addr = addr;
        }
        if let Some(url) = &self.devtools_url {
            config.devtools_ws_url = Some(url.clone());
        }
        config.strict_verdicts |= self.strict;
        config.session_require_init |= self.require_init;
        config.simulate |= self.simulate;
    }
}

pub async fn run_send(
    url: String,
    action: String,
    target: Option<String>,
    params: Option<String>,
    wait: u64,
) -> Result<()> {
    let parameters: Map<String, Value> = match params {
        Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON object")?,
        None => Map::new(),
    };
    let mut command = Command::new(Action::parse(&action));
    command.parameters = parameters;
    if let Some(target) = target {
        command = command.with_target(target);
    }

    let mut client = RelayClient::connect(&url).await?;
    let ack = client.init(Some("cli")).await?;
    debug!(session_id = %ack.session_id, "initialised");

    let outcome = client
        .execute(&command, Duration::from_secs(wait))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    client.close().await?;
    Ok(())
}
