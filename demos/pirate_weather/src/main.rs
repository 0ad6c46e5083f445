//! Pirate Weather
//!
//! A weather bot that talks like a pirate. Type into the terminal and the
//! bot answers on stdout:
//!
//! ```text
//! > ping
//! [you@localhost/console] pong
//! > weather in Kiev
//! [you@localhost/console] +19 raining. ARGH!!
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package pirate-weather -- --jid pirate@localhost
//! cargo run --package pirate-weather -- --config ./courier.toml
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use courier::prelude::*;
use courier::runtime::config::LogOutput;
use courier::runtime::{logging, validate_config};

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "pirate-weather", about = "A weather bot that talks like a pirate")]
struct Cli {
    /// JID the bot signs in as. Overrides `server.jid` from the config.
    #[arg(long)]
    jid: Option<String>,

    /// Account password. Overrides `server.password` from the config.
    #[arg(long)]
    password: Option<String>,

    /// Configuration file. Defaults to searching for `courier.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Who the console user appears to be.
    #[arg(long, default_value = "you@localhost/console")]
    user: String,
}

// ============================================================================
// Weather
// ============================================================================

fn forecasts() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("Amsterdam", "+23 sunny. ARRRGH!!"),
        ("Kiev", "+19 raining. ARGH!!"),
    ])
}

fn weather_for_city(city: &str) -> String {
    forecasts()
        .get(city)
        .map(|forecast| (*forecast).to_owned())
        .unwrap_or_else(|| format!("Weather for {city} unknown. ARHG!!"))
}

// ============================================================================
// Handlers
// ============================================================================

async fn ping() -> &'static str {
    "pong"
}

async fn help() -> &'static str {
    "Type \"weather in <city_name>\" to get weather in that city.\n\
     Type \"cities\" to get list of cities."
}

async fn cities() -> String {
    forecasts().keys().copied().collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Deserialize)]
struct City {
    city: String,
}

async fn weather(Args(args): Args<City>) -> String {
    weather_for_city(&args.city)
}

fn build_app(config: AppConfig) -> Result<Application> {
    let app = Application::with_config("pirate_weather", config);
    app.route("ping", ping)?;
    app.route("help", help)?;
    app.route("cities", cities)?;
    app.route("weather in <string:city>", weather)?;
    Ok(app)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.file(path);
    }
    let mut config = loader.load()?;
    if cli.jid.is_some() {
        config.server.jid = cli.jid;
    }
    if cli.password.is_some() {
        config.server.password = cli.password;
    }
    if config.server.jid.is_none() {
        config.server.jid = Some("pirate@localhost".to_owned());
    }
    // stdout belongs to the conversation.
    if config.logging.output == LogOutput::Stdout {
        config.logging.output = LogOutput::Stderr;
    }
    validate_config(&config)?;
    logging::init_from_config(&config.logging);

    let user: Jid = cli
        .user
        .parse()
        .with_context(|| format!("invalid console user '{}'", cli.user))?;
    let app = build_app(config.app.clone())?;
    let transport = Arc::new(ConsoleTransport::new(user));
    let server = Server::new(app, transport, config.server)?;

    info!("Arr! Type \"help\" to get started, Ctrl+D to leave");
    server.serve_forever().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ask(server: &Server, transport: &LoopbackTransport, body: &str) -> Vec<String> {
        let alice: Jid = "alice@example.com/ship".parse().unwrap();
        server.handle(Stanza::message(alice, body)).await.unwrap();
        transport
            .take_sent()
            .iter()
            .filter_map(|sent| sent.body().map(str::to_owned))
            .collect()
    }

    fn server() -> (Server, Arc<LoopbackTransport>) {
        let app = build_app(AppConfig::default()).unwrap();
        let transport = Arc::new(LoopbackTransport::new());
        let config = ServerConfig {
            jid: Some("pirate@localhost".into()),
            ..Default::default()
        };
        let server = Server::new(app, transport.clone(), config).unwrap();
        server.start().unwrap();
        (server, transport)
    }

    #[tokio::test]
    async fn test_conversation() {
        let (server, transport) = server();
        assert_eq!(ask(&server, &transport, "ping").await, vec!["pong"]);
        assert_eq!(
            ask(&server, &transport, "cities").await,
            vec!["Amsterdam, Kiev"]
        );
        assert_eq!(
            ask(&server, &transport, "weather in Kiev").await,
            vec!["+19 raining. ARGH!!"]
        );
        assert_eq!(
            ask(&server, &transport, "weather in Port Royal").await,
            vec!["Weather for Port Royal unknown. ARHG!!"]
        );
        assert!(ask(&server, &transport, "parrot").await.is_empty());
    }

    #[test]
    fn test_cli() {
        let cli = Cli::parse_from(["pirate-weather", "--jid", "captain@sea.example"]);
        assert_eq!(cli.jid.as_deref(), Some("captain@sea.example"));
        assert_eq!(cli.user, "you@localhost/console");
        assert!(cli.config.is_none());
    }
}
