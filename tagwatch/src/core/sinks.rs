/*!
Event sinks: pluggable destinations for the tracker's event feed.

Every zone event is fanned out to all enabled sinks. A sink failure is
logged and never stops the tracker or the other sinks.
*/

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, error, info};

use crate::core::config::{OutputConfig, SinkPlugin, TerminalFormat};
use crate::core::events::{EventKind, TagEvent};
use crate::error::{TrackerError, TrackerResult};

/// A destination for zone events
#[async_trait]
pub trait EventSink: Send {
    /// Name of this sink, used in logs
    fn name(&self) -> &'static str;

    /// Prepare the sink (open files, create tables)
    async fn initialize(&mut self) -> TrackerResult<()>;

    /// Deliver one event
    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()>;

    /// Flush and release resources
    async fn finalize(&mut self) -> TrackerResult<()>;
}

/// Fans events out to every enabled sink
pub struct SinkManager {
    sinks: Vec<Box<dyn EventSink>>,
}

impl SinkManager {
    /// Build sinks for every enabled output in the configuration
    pub fn from_config(configs: &[OutputConfig]) -> TrackerResult<Self> {
        let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
        for config in configs {
            if !config.enabled {
                continue;
            }
            sinks.push(build_sink(&config.plugin));
        }
        Ok(Self { sinks })
    }

    /// Add a sink built outside the configuration
    pub fn push(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn initialize_all(&mut self) -> TrackerResult<()> {
        for sink in &mut self.sinks {
            sink.initialize().await?;
            info!("🔌 Initialized output sink: {}", sink.name());
        }
        Ok(())
    }

    /// Deliver an event to every sink, logging failures without propagating
    pub async fn emit_all(&mut self, event: &TagEvent) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(event).await {
                error!("Output sink '{}' failed: {}", sink.name(), e);
            }
        }
    }

    pub async fn finalize_all(&mut self) -> TrackerResult<()> {
        for sink in &mut self.sinks {
            sink.finalize().await?;
        }
        Ok(())
    }
}

fn build_sink(plugin: &SinkPlugin) -> Box<dyn EventSink> {
    match plugin {
        SinkPlugin::Terminal { format } => Box::new(TerminalSink::new(*format)),
        SinkPlugin::TextLog { path } => Box::new(TextLogSink::new(path.clone())),
        SinkPlugin::JsonLines { path, pretty } => {
            Box::new(JsonLinesSink::new(path.clone(), *pretty))
        }
        SinkPlugin::Sqlite { path, table_name } => {
            Box::new(SqliteSink::new(path.clone(), table_name.clone()))
        }
        SinkPlugin::Webhook {
            url,
            auth_token,
            alerts_only,
        } => Box::new(WebhookSink::new(url.clone(), auth_token.clone(), *alerts_only)),
    }
}

/// Prints events to stdout
pub struct TerminalSink {
    format: TerminalFormat,
}

impl TerminalSink {
    pub fn new(format: TerminalFormat) -> Self {
        Self { format }
    }

    fn format_event(&self, event: &TagEvent) -> TrackerResult<String> {
        match self.format {
            TerminalFormat::Plain => Ok(event.log_line()),
            TerminalFormat::Colored => {
                let color = match event.kind {
                    EventKind::Registered => "\x1b[36m",
                    EventKind::Added => "\x1b[32m",
                    EventKind::Removed => "\x1b[33m",
                    EventKind::Renamed => "\x1b[35m",
                    EventKind::TimeoutChanged => "\x1b[34m",
                    EventKind::AbsenceAlert => "\x1b[1;31m",
                };
                Ok(format!("{}{}\x1b[0m", color, event.log_line()))
            }
            TerminalFormat::Json => Ok(serde_json::to_string_pretty(event)?),
        }
    }
}

#[async_trait]
impl EventSink for TerminalSink {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn initialize(&mut self) -> TrackerResult<()> {
        if self.format == TerminalFormat::Colored {
            println!("\x1b[1m🚀 Zone event feed started\x1b[0m");
        }
        Ok(())
    }

    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
        println!("{}", self.format_event(event)?);
        Ok(())
    }

    async fn finalize(&mut self) -> TrackerResult<()> {
        if self.format == TerminalFormat::Colored {
            println!("\x1b[1m🏁 Zone event feed closed\x1b[0m");
        }
        Ok(())
    }
}

/// Appends one plain-text line per event, in the classic scanner log format
pub struct TextLogSink {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl TextLogSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }
}

#[async_trait]
impl EventSink for TextLogSink {
    fn name(&self) -> &'static str {
        "text-log"
    }

    async fn initialize(&mut self) -> TrackerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
        if let Some(file) = &mut self.file {
            writeln!(file, "{}", event.log_line())?;
            file.flush()?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> TrackerResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Appends events as JSON, one record per write
pub struct JsonLinesSink {
    path: PathBuf,
    pretty: bool,
    file: Option<std::fs::File>,
}

impl JsonLinesSink {
    pub fn new(path: PathBuf, pretty: bool) -> Self {
        Self {
            path,
            pretty,
            file: None,
        }
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    async fn initialize(&mut self) -> TrackerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
        if let Some(file) = &mut self.file {
            let json = if self.pretty {
                serde_json::to_string_pretty(event)?
            } else {
                serde_json::to_string(event)?
            };
            writeln!(file, "{json}")?;
            file.flush()?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> TrackerResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Inserts one row per event into a SQLite table
pub struct SqliteSink {
    path: PathBuf,
    table_name: String,
    conn: Option<Connection>,
}

impl SqliteSink {
    pub fn new(path: PathBuf, table_name: String) -> Self {
        Self {
            path,
            table_name,
            conn: None,
        }
    }
}

#[async_trait]
impl EventSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn initialize(&mut self) -> TrackerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                summary TEXT NOT NULL
            );",
            self.table_name
        ))?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
        if let Some(conn) = &self.conn {
            conn.execute(
                &format!(
                    "INSERT INTO {} (timestamp, kind, tag_id, display_name, summary)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.table_name
                ),
                (
                    event.timestamp.to_rfc3339(),
                    event.kind.as_str(),
                    event.tag_id.as_str(),
                    &event.display_name,
                    &event.summary,
                ),
            )?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> TrackerResult<()> {
        self.conn = None;
        Ok(())
    }
}

/// Posts events to an HTTP endpoint as JSON
pub struct WebhookSink {
    url: String,
    auth_token: Option<String>,
    alerts_only: bool,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, auth_token: Option<String>, alerts_only: bool) -> Self {
        Self {
            url,
            auth_token,
            alerts_only,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn initialize(&mut self) -> TrackerResult<()> {
        debug!(url = %self.url, alerts_only = self.alerts_only, "Webhook sink ready");
        Ok(())
    }

    async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
        if self.alerts_only && event.kind != EventKind::AbsenceAlert {
            return Ok(());
        }
        let mut request = self.client.post(&self.url).json(event);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::WebhookStatus(response.status().as_u16()));
        }
        Ok(())
    }

    async fn finalize(&mut self) -> TrackerResult<()> {
        Ok(())
    }
}
