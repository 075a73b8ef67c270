use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tcplog_protocol::attribute::is_json_number;
use tcplog_protocol::config::{
    KEY_CONNECT_TIMEOUT_MS, KEY_FILE_DIRECTORY, KEY_GENERATE_SESSION_GUID, KEY_HOST_NAME,
    KEY_PORT, KEY_RESOLVE_TIMEOUT_MS, KEY_SINK, KEY_TIMESTAMP_EVENTS,
};
use tcplog_protocol::{
    Attribute, AttributeValue, BuildProfile, Event, SinkKind, StaticIdentity, TelemetryConfig,
    TelemetrySettings,
};
use tcplog_session::SessionManager;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tcplog")]
#[command(about = "Record telemetry events into one session and deliver them")]
struct Cli {
    /// Collector host name.
    #[arg(long, default_value = "")]
    host: String,
    /// Collector port.
    #[arg(long, default_value = "")]
    port: String,
    /// network, file, or both.
    #[arg(long, default_value = "network")]
    sink: String,
    /// Directory for session documents (file sink).
    #[arg(long, default_value = "telemetry")]
    dir: PathBuf,
    /// Identify sessions with random GUIDs and attach the device id.
    #[arg(long)]
    guid: bool,
    /// Add a creation timestamp to the session header.
    #[arg(long)]
    timestamp: bool,
    #[arg(long, default_value_t = 5_000)]
    resolve_timeout_ms: u64,
    #[arg(long, default_value_t = 5_000)]
    connect_timeout_ms: u64,
    /// JSON settings document with per-profile host/port values.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Build profile to select from --settings.
    #[arg(long, default_value = "development")]
    profile: String,
    #[arg(long, env = "USER", default_value = "anonymous")]
    user: String,
    /// Session-start attribute, `key=value`. Repeatable.
    #[arg(long = "session-attr")]
    session_attrs: Vec<String>,
    /// Read one JSON-encoded event per line from stdin.
    #[arg(long)]
    stdin: bool,
    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
    /// Events as `name` or `name:key=value,key=value`.
    events: Vec<String>,
}

fn parse_attribute(text: &str) -> Result<Attribute> {
    let Some((name, value)) = text.split_once('=') else {
        bail!("attribute must be key=value: {text}");
    };
    let value = if is_json_number(value) {
        AttributeValue::numeric(value)
    } else {
        AttributeValue::text(value)
    };
    Ok(Attribute::new(name.trim(), value))
}

fn parse_event(text: &str) -> Result<Event> {
    let (name, attributes) = match text.split_once(':') {
        Some((name, rest)) => (
            name,
            rest.split(',')
                .filter(|part| !part.is_empty())
                .map(parse_attribute)
                .collect::<Result<Vec<_>>>()?,
        ),
        None => (text, Vec::new()),
    };
    if name.trim().is_empty() {
        bail!("event name missing in {text:?}");
    }
    Ok(Event::new(name.trim()).with_attributes(attributes))
}

async fn load_config(cli: &Cli) -> Result<TelemetryConfig> {
    let sink: SinkKind = cli.sink.parse()?;
    let mut config = match &cli.settings {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed reading settings {path:?}"))?;
            let settings: TelemetrySettings =
                serde_json::from_str(&raw).context("failed parsing settings")?;
            let profile: BuildProfile = cli.profile.parse()?;
            settings.config_for_sink(profile, sink)?
        }
        None if sink.uses_network() => TelemetryConfig::from_lookup(|key| match key {
            KEY_HOST_NAME => Some(cli.host.clone()),
            KEY_PORT => Some(cli.port.clone()),
            KEY_GENERATE_SESSION_GUID => Some(cli.guid.to_string()),
            KEY_TIMESTAMP_EVENTS => Some(cli.timestamp.to_string()),
            KEY_SINK => Some(cli.sink.clone()),
            KEY_FILE_DIRECTORY => Some(cli.dir.display().to_string()),
            KEY_RESOLVE_TIMEOUT_MS => Some(cli.resolve_timeout_ms.to_string()),
            KEY_CONNECT_TIMEOUT_MS => Some(cli.connect_timeout_ms.to_string()),
            _ => None,
        })?,
        None => TelemetryConfig::file(&cli.dir)
            .generate_session_guid(cli.guid)
            .timestamp_events(cli.timestamp),
    };
    config.sink = sink;
    config.file_directory = cli.dir.clone();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .compact()
            .init();
    }

    let config = load_config(&cli).await?;
    let events = cli
        .events
        .iter()
        .map(|text| parse_event(text))
        .collect::<Result<Vec<_>>>()?;
    let session_attrs = cli
        .session_attrs
        .iter()
        .map(|text| parse_attribute(text))
        .collect::<Result<Vec<_>>>()?;

    let manager = SessionManager::builder(config)
        .identity(Arc::new(StaticIdentity::new(cli.user.as_str())))
        .build()?;

    let session = manager.start_session(session_attrs).await?;
    info!(session_id = %session.session_id, user_id = %session.user_id, "recording");

    let mut recorded = 0usize;
    for event in events {
        if manager.record(event).await.is_ok() {
            recorded += 1;
        }
    }

    if cli.stdin {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if manager.record(event).await.is_ok() {
                        recorded += 1;
                    }
                }
                Err(error) => warn!(%error, "skipping malformed event line"),
            }
        }
    }

    manager.end_session().await?;
    info!(recorded, "done");
    Ok(())
}
