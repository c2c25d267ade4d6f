//! Resident Assistant - streaming assistant client
//!
//! Client side of the resident management console's chat assistant:
//! - Decodes the streamed answer and the agent directives embedded in it
//! - Applies directives as navigation and search intents on the list pages
//! - Correlates a search with the page data it eventually produces
//! - Sends answer feedback and splices corrected answers back into history

pub mod agent;
pub mod chat;
pub mod display;
pub mod pages;
pub mod protocol;
pub mod transport;

pub use agent::{ActionDispatcher, AgentBus, CorrelationTracker, ScheduledTasks};
pub use chat::{ChatSession, Conversation, FrameDecoder, Message, StreamEvent, TurnState};
pub use pages::{Directory, ListView, Router};
pub use transport::{ChatTransport, HttpTransport};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
const DEFAULT_GREETING: &str = "Hello! I am the assistant of the resident management system. \
Ask me about residents, households or fees, or type \"help\" to see what I can do.";

/// Delays after which a pending status message completes on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDelays {
    pub navigate: Duration,
    pub open_detail: Duration,
    pub person_search: Duration,
    pub household_search: Duration,
}

impl Default for StatusDelays {
    fn default() -> Self {
        Self {
            navigate: Duration::from_millis(900),
            open_detail: Duration::from_millis(1000),
            person_search: Duration::from_millis(15_000),
            household_search: Duration::from_millis(500),
        }
    }
}

/// Configuration for the assistant client
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Base URL of the assistant server
    pub server_url: String,

    /// Ask the server for a streamed answer
    pub stream: bool,

    /// Connect timeout for requests (streams themselves never time out)
    pub connect_timeout: Duration,

    /// First bot message shown when the conversation opens
    pub greeting: Option<String>,

    /// Delay between characters when the agent types into a search box
    pub typing_delay: Duration,

    /// JSON fixture backing the list pages
    pub directory_file: Option<PathBuf>,

    /// Auto-complete delays for status messages
    pub status_delays: StatusDelays,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

/// On-disk shape of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    server_url: Option<String>,
    stream: Option<bool>,
    connect_timeout_secs: Option<u64>,
    greeting: Option<String>,
    typing_delay_ms: Option<u64>,
    directory_file: Option<PathBuf>,
    status_delays: Option<StatusDelaysToml>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusDelaysToml {
    navigate: Option<u64>,
    open_detail: Option<u64>,
    person_search: Option<u64>,
    household_search: Option<u64>,
}

impl AssistantConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            stream: true,
            connect_timeout: Duration::from_secs(15),
            greeting: Some(DEFAULT_GREETING.to_string()),
            typing_delay: Duration::from_millis(65),
            directory_file: None,
            status_delays: StatusDelays::default(),
        }
    }

    /// Load from a TOML file, overlaying the keys it sets on the defaults.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let file: ConfigToml = toml::from_str(&content)?;

        if let Some(url) = file.server_url {
            config.server_url = url;
        }
        if let Some(stream) = file.stream {
            config.stream = stream;
        }
        if let Some(secs) = file.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(greeting) = file.greeting {
            config.greeting = Some(greeting).filter(|g| !g.trim().is_empty());
        }
        if let Some(ms) = file.typing_delay_ms {
            config.typing_delay = Duration::from_millis(ms);
        }
        if let Some(dir) = file.directory_file {
            // Relative paths are resolved against the config file
            config.directory_file = Some(match path.parent() {
                Some(parent) if dir.is_relative() => parent.join(dir),
                _ => dir,
            });
        }
        if let Some(delays) = file.status_delays {
            let ms = Duration::from_millis;
            let d = &mut config.status_delays;
            d.navigate = delays.navigate.map(ms).unwrap_or(d.navigate);
            d.open_detail = delays.open_detail.map(ms).unwrap_or(d.open_detail);
            d.person_search = delays.person_search.map(ms).unwrap_or(d.person_search);
            d.household_search = delays.household_search.map(ms).unwrap_or(d.household_search);
        }

        Ok(config)
    }

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("resident-assistant").join("config.toml"))
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    pub fn with_directory_file(mut self, path: PathBuf) -> Self {
        self.directory_file = Some(path);
        self
    }

    pub fn with_status_delays(mut self, delays: StatusDelays) -> Self {
        self.status_delays = delays;
        self
    }
}

/// Result type for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Errors that can occur in the assistant client
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
