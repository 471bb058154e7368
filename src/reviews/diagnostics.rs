//! Categorized log channel shared by the sync engine.
//!
//! Every message is prefixed with the provider and engine id, consecutive
//! duplicates are collapsed, and optional debug channels (request, response,
//! headers, products, product) can be switched on per run. Messages always go
//! to `tracing`; a sink callback can additionally capture them (used by the CLI
//! `--json` mode and by tests).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugChannel {
    Request,
    Response,
    Headers,
    Products,
    Product,
}

impl DebugChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            DebugChannel::Request => "request",
            DebugChannel::Response => "response",
            DebugChannel::Headers => "headers",
            DebugChannel::Products => "products",
            DebugChannel::Product => "product",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown debug channel: {0:?} (expected request, response, headers, products, product or ALL)")]
pub struct UnknownDebugChannel(pub String);

impl FromStr for DebugChannel {
    type Err = UnknownDebugChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(DebugChannel::Request),
            "response" => Ok(DebugChannel::Response),
            "headers" => Ok(DebugChannel::Headers),
            "products" => Ok(DebugChannel::Products),
            "product" => Ok(DebugChannel::Product),
            _ => Err(UnknownDebugChannel(s.to_string())),
        }
    }
}

impl fmt::Display for DebugChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which debug channels are enabled for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebugSelection {
    #[default]
    Off,
    All,
    Channels(BTreeSet<DebugChannel>),
}

impl DebugSelection {
    pub fn is_enabled(&self, channel: DebugChannel) -> bool {
        match self {
            DebugSelection::Off => false,
            DebugSelection::All => true,
            DebugSelection::Channels(set) => set.contains(&channel),
        }
    }
}

impl FromStr for DebugSelection {
    type Err = UnknownDebugChannel;

    /// Accepts `ALL` or a comma-separated channel list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(DebugSelection::Off);
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(DebugSelection::All);
        }
        let channels = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(DebugChannel::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(DebugSelection::Channels(channels))
    }
}

pub type LogSink = Box<dyn Fn(&str) + Send + Sync>;

pub struct Diagnostics {
    provider: String,
    engine_id: String,
    debug: DebugSelection,
    sink: Option<LogSink>,
    last_message: Option<String>,
    suppressed: u64,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("provider", &self.provider)
            .field("engine_id", &self.engine_id)
            .field("debug", &self.debug)
            .field("sink", &self.sink.is_some())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl Diagnostics {
    pub fn new(provider: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            engine_id: engine_id.into(),
            debug: DebugSelection::Off,
            sink: None,
            last_message: None,
            suppressed: 0,
        }
    }

    pub fn set_debug(&mut self, debug: DebugSelection) {
        self.debug = debug;
    }

    pub fn set_sink(&mut self, sink: LogSink) {
        self.sink = Some(sink);
    }

    /// Number of messages dropped because they repeated the previous one.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn is_enabled(&self, channel: DebugChannel) -> bool {
        self.debug.is_enabled(channel)
    }

    /// Log a message together with optional context lines. Returns the
    /// formatted message, or `None` when it repeated the previous one.
    pub fn log(&mut self, message: &str, context: &[String]) -> Option<String> {
        let formatted = self.format(message, context)?;
        warn!(
            target: "reviews",
            provider = %self.provider,
            engine_id = %self.engine_id,
            "{}",
            formatted
        );
        self.emit(&formatted);
        Some(formatted)
    }

    /// Log on a debug channel; a no-op unless the channel is enabled.
    pub fn debug(&mut self, channel: DebugChannel, payload: impl fmt::Display) -> Option<String> {
        if !self.debug.is_enabled(channel) {
            return None;
        }
        let formatted = self.format(&format!("{channel}: {payload}"), &[])?;
        debug!(
            target: "reviews::debug",
            provider = %self.provider,
            engine_id = %self.engine_id,
            channel = channel.as_str(),
            "{}",
            formatted
        );
        self.emit(&formatted);
        Some(formatted)
    }

    fn format(&mut self, message: &str, context: &[String]) -> Option<String> {
        let body = std::iter::once(message)
            .chain(context.iter().map(String::as_str))
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let formatted = format!(
            "In {} for engine {}: {}",
            self.provider, self.engine_id, body
        );
        if self.last_message.as_deref() == Some(formatted.as_str()) {
            self.suppressed += 1;
            trace!(target: "reviews", suppressed = self.suppressed, "duplicate message collapsed");
            return None;
        }
        self.last_message = Some(formatted.clone());
        Some(formatted)
    }

    fn emit(&self, formatted: &str) {
        if let Some(sink) = &self.sink {
            sink(formatted);
        }
    }
}
