use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Connection flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Base URL of the chat service
    #[arg(long, env = "ASKDB_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Seconds to wait for a connection before giving up
    #[arg(long, env = "ASKDB_CONNECT_TIMEOUT", default_value_t = 10, global = true)]
    pub connect_timeout: u64,

    /// Where the full-screen client writes its log
    #[arg(long, env = "ASKDB_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("askdb.log"))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Presentation tunables for the full-screen client.
#[derive(Debug, Clone, Copy)]
pub struct UiConfig {
    /// How long a notification stays fully visible.
    pub notice_display: Duration,
    /// Fade-out time before a notification is removed.
    pub notice_fade: Duration,
    /// Rows from the bottom within which the transcript keeps following new output.
    pub scroll_proximity: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            notice_display: Duration::from_millis(3000),
            notice_fade: Duration::from_millis(500),
            scroll_proximity: 6,
        }
    }
}
