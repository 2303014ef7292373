//! # parley
//!
//! Command-line client for the Parley notification broker. Wires settings,
//! logging, and the connection manager together.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parley_client::{ClientConfig, ConnectionManager, ConnectionState, Message};
use parley_settings::{LogFormat, ParleySettings};
use tracing::{info, warn};

/// STOMP-over-WebSocket client.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "STOMP-over-WebSocket client for Parley")]
struct Cli {
    /// Settings file (default: `~/.parley/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Broker endpoint (`ws://` or `wss://`), overrides settings.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format.
    #[arg(long, global = true, value_parser = parse_format)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe and print each message as a JSON line until Ctrl-C.
    Listen {
        /// Destination to subscribe to (repeatable). Defaults to
        /// `connection.defaultTopic`.
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// Publish one message and exit.
    Send {
        /// Destination to publish to.
        #[arg(long)]
        destination: String,

        /// Message body.
        #[arg(long)]
        body: String,

        /// Extra SEND header as `name=value` (repeatable).
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// How long to wait for the connection, in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        wait_ms: u64,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))?;
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_format(raw: &str) -> Result<LogFormat, String> {
    parley_settings::loader::parse_log_format(raw).ok_or_else(|| format!("expected pretty or json, got {raw:?}"))
}

/// Settings file, then env, then command-line flags.
fn load_settings(cli: &Cli) -> Result<ParleySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(parley_settings::settings_path);
    let mut settings = parley_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(endpoint) = &cli.endpoint {
        settings.connection.endpoint_url.clone_from(endpoint);
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        settings.logging.format = format;
    }
    parley_settings::validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    parley_logging::init_subscriber(&settings.logging).context("Failed to initialize logging")?;

    let manager = ConnectionManager::new(ClientConfig::from(&settings.connection))
        .context("Invalid connection settings")?;

    match cli.command {
        Command::Listen { mut topics } => {
            if topics.is_empty() {
                topics.extend(settings.connection.default_topic);
            }
            if topics.is_empty() {
                bail!("No topic given: pass --topic or set connection.defaultTopic");
            }
            listen(&manager, &topics).await
        }
        Command::Send {
            destination,
            body,
            headers,
            wait_ms,
        } => {
            send(
                &manager,
                &destination,
                &headers,
                body,
                Duration::from_millis(wait_ms),
            )
            .await
        }
    }
}

fn print_message(message: &Message) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to encode message"),
    }
}

/// Subscribe `print_message` to each topic; returns how many took.
fn subscribe_topics(manager: &ConnectionManager, topics: &[String]) -> usize {
    topics
        .iter()
        .filter(|topic| {
            let ok = manager.subscribe(topic, print_message).is_some();
            if !ok {
                warn!(%topic, "subscribe failed, waiting for the next connection");
            }
            ok
        })
        .count()
}

/// Subscribe on every transition to connected, since subscriptions do not
/// survive a reconnect unless the manager keeps them.
async fn listen(manager: &ConnectionManager, topics: &[String]) -> Result<()> {
    let keeps_subscriptions = manager.config().resubscribe_on_reconnect;
    let mut subscribed = false;
    let mut state = manager.watch_state();
    manager.connect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if current != ConnectionState::Connected || (subscribed && keeps_subscriptions) {
                    continue;
                }
                let active = subscribe_topics(manager, topics);
                subscribed = active > 0;
                if subscribed {
                    info!(?topics, active, "listening");
                }
            }
        }
    }

    manager.close().await;
    Ok(())
}

async fn send(
    manager: &ConnectionManager,
    destination: &str,
    headers: &[(String, String)],
    body: String,
    wait: Duration,
) -> Result<()> {
    let mut state = manager.watch_state();
    manager.connect();

    let connected = tokio::time::timeout(wait, state.wait_for(|s| s.is_connected()))
        .await
        .is_ok_and(|r| r.is_ok());
    if !connected {
        manager.close().await;
        bail!(
            "Not connected to {} after {wait:?}",
            manager.config().endpoint_url
        );
    }

    let sent = manager.send_with_headers(destination, headers, body);
    manager.close().await;
    if !sent {
        bail!("Connection lost before the message was sent");
    }
    info!(destination, "message sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_flag_parsing() {
        assert_eq!(
            parse_header("content-type=application/json"),
            Ok(("content-type".to_string(), "application/json".to_string()))
        );
        assert_eq!(parse_header("x=a=b"), Ok(("x".to_string(), "a=b".to_string())));
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=v").is_err());
    }

    #[test]
    fn format_flag_parsing() {
        assert_eq!(parse_format("json"), Ok(LogFormat::Json));
        assert!(parse_format("xml").is_err());
    }

    #[test]
    fn cli_parses_send() {
        let cli = Cli::try_parse_from([
            "parley",
            "--endpoint",
            "ws://localhost:8080/ws",
            "send",
            "--destination",
            "/app/cases",
            "--body",
            "hi",
            "--header",
            "priority=9",
        ])
        .unwrap();
        assert_eq!(cli.endpoint.as_deref(), Some("ws://localhost:8080/ws"));
        match cli.command {
            Command::Send {
                destination,
                headers,
                wait_ms,
                ..
            } => {
                assert_eq!(destination, "/app/cases");
                assert_eq!(headers, vec![("priority".to_string(), "9".to_string())]);
                assert_eq!(wait_ms, 10_000);
            }
            Command::Listen { .. } => panic!("expected send"),
        }
    }

    #[tokio::test]
    async fn listen_counts_only_subscriptions_that_took() {
        use parley_client::mock::MockBroker;

        let broker = MockBroker::new();
        let manager = ConnectionManager::with_connector(
            ClientConfig::new("ws://broker.test/ws"),
            broker.connector(),
        )
        .unwrap();
        let topics = vec!["/topic/a".to_string(), "/topic/b".to_string()];
        assert_eq!(subscribe_topics(&manager, &topics), 0);

        manager.connect();
        let mut state = manager.watch_state();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subscribe_topics(&manager, &topics), 2);
        assert!(broker.wait_for_subscription("/topic/b").await);
        manager.close().await;
    }

    #[test]
    fn cli_flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "parley",
            "--settings",
            dir.path().join("missing.json").to_str().unwrap(),
            "--endpoint",
            "wss://broker.example/ws",
            "--log-format",
            "json",
            "listen",
            "--topic",
            "/topic/a",
        ])
        .unwrap();
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.connection.endpoint_url, "wss://broker.example/ws");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }
}
