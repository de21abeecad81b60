use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const SESSION_KEY_LENGTH: usize = 64;

pub const START_DOWNLOAD_BYTES: u64 = 1_024_000;
pub const MIN_DOWNLOAD_BYTES: u64 = 1_024_000;
pub const MAX_DOWNLOAD_BYTES: u64 = 52_000_000;
pub const DOWNLOAD_GROW_FACTOR: u64 = 2;
/// Concurrent request loops each worker keeps in flight.
pub const DOWNLOAD_REQUESTS: usize = 2;

pub const UPLOAD_BYTES: usize = 5_000_000;
pub const UPLOAD_REQUESTS: usize = 2;

/// Largest block the random source hands out per call.
pub const MAX_PROVIDER_ARRAY: usize = 65_536;

/// Delay between entering a transfer phase and attaching the status feed.
pub const STATUS_DELAY_INTERVAL: Duration = Duration::from_millis(750);

pub const STATUS_CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub const PING_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Post-run status tail is the upload duration divided by this.
pub const STATUS_TAIL_DIVISOR: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// 1000 divisor, kB / MB / GB.
    Si,
    /// 1024 divisor, KiB / MiB / GiB.
    Binary,
}

impl DisplayMode {
    pub fn toggle(self) -> Self {
        match self {
            DisplayMode::Si => DisplayMode::Binary,
            DisplayMode::Binary => DisplayMode::Si,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayMode::Si => "SI (kB, MB)",
            DisplayMode::Binary => "binary (KiB, MiB)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: String,
    pub download_endpoint: String,
    pub upload_endpoint: String,
    pub status_endpoint: String,
    pub clear_endpoint: String,
    pub echo_endpoint: String,

    pub ping_secs: u64,
    pub download_secs: u64,
    pub upload_secs: u64,
    pub download_workers: usize,
    pub upload_workers: usize,
    pub download_requests: usize,
    pub upload_requests: usize,
    pub upload_bytes: usize,
    pub display: DisplayMode,

    /// Upper bound on the pool termination handshake before the phase is advanced anyway.
    pub ack_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: "http://localhost:8000".to_string(),
            download_endpoint: "/api/download".to_string(),
            upload_endpoint: "/api/upload".to_string(),
            status_endpoint: "/api/status".to_string(),
            clear_endpoint: "/api/clear".to_string(),
            echo_endpoint: "/ws".to_string(),
            ping_secs: 3,
            download_secs: 10,
            upload_secs: 10,
            download_workers: 4,
            upload_workers: 4,
            download_requests: DOWNLOAD_REQUESTS,
            upload_requests: UPLOAD_REQUESTS,
            upload_bytes: UPLOAD_BYTES,
            display: DisplayMode::Si,
            ack_timeout: Duration::from_secs(2),
        }
    }
}

impl Settings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs)
    }

    pub fn download_interval(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), endpoint)
    }

    pub fn download_url(&self) -> String {
        self.url(&self.download_endpoint)
    }

    pub fn upload_url(&self) -> String {
        self.url(&self.upload_endpoint)
    }

    pub fn status_url(&self) -> String {
        self.url(&self.status_endpoint)
    }

    pub fn clear_url(&self) -> String {
        self.url(&self.clear_endpoint)
    }

    /// Echo socket address, with the scheme switched to `ws`/`wss`.
    pub fn echo_url(&self) -> String {
        let url = self.url(&self.echo_endpoint);
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url
        }
    }

    /// Origin the echo server expects: the HTTP form of the server base.
    pub fn origin(&self) -> String {
        self.server.trim_end_matches('/').to_string()
    }
}

#[derive(Parser, Debug)]
#[command(name = "netgauge")]
#[command(about = "Measure latency, download and upload throughput against a test server", long_about = None)]
pub struct Args {
    /// Base URL of the test server
    #[arg(long, env = "NETGAUGE_SERVER", default_value = "http://localhost:8000")]
    pub server: String,

    /// Seconds spent measuring latency
    #[arg(long, env = "NETGAUGE_PING_SECS", default_value = "3")]
    pub ping_secs: u64,

    /// Seconds spent measuring download throughput
    #[arg(long, env = "NETGAUGE_DOWNLOAD_SECS", default_value = "10")]
    pub download_secs: u64,

    /// Seconds spent measuring upload throughput
    #[arg(long, env = "NETGAUGE_UPLOAD_SECS", default_value = "10")]
    pub upload_secs: u64,

    /// Concurrent download workers
    #[arg(long, env = "NETGAUGE_DOWNLOAD_WORKERS", default_value = "4")]
    pub download_workers: usize,

    /// Concurrent upload workers
    #[arg(long, env = "NETGAUGE_UPLOAD_WORKERS", default_value = "4")]
    pub upload_workers: usize,

    /// Requests each download worker keeps in flight
    #[arg(long, env = "NETGAUGE_DOWNLOAD_REQUESTS", default_value = "2")]
    pub download_requests: usize,

    /// Requests each upload worker keeps in flight
    #[arg(long, env = "NETGAUGE_UPLOAD_REQUESTS", default_value = "2")]
    pub upload_requests: usize,

    /// Show rates with binary prefixes (KiB/s) instead of SI (kB/s)
    #[arg(long)]
    pub binary: bool,

    /// Milliseconds to wait for a worker pool to acknowledge termination
    #[arg(long, env = "NETGAUGE_ACK_TIMEOUT_MS", default_value = "2000")]
    pub ack_timeout_ms: u64,

    /// Write logs to this file (the terminal is owned by the UI)
    #[arg(long, env = "NETGAUGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl From<&Args> for Settings {
    fn from(args: &Args) -> Self {
        Self {
            server: args.server.clone(),
            ping_secs: args.ping_secs.max(1),
            download_secs: args.download_secs.max(1),
            upload_secs: args.upload_secs.max(1),
            download_workers: args.download_workers.max(1),
            upload_workers: args.upload_workers.max(1),
            download_requests: args.download_requests.max(1),
            upload_requests: args.upload_requests.max(1),
            display: if args.binary {
                DisplayMode::Binary
            } else {
                DisplayMode::Si
            },
            ack_timeout: Duration::from_millis(args.ack_timeout_ms),
            ..Settings::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    DownloadWorkers,
    UploadWorkers,
    DownloadDuration,
    UploadDuration,
    Display,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::DownloadWorkers => SettingsField::UploadWorkers,
            SettingsField::UploadWorkers => SettingsField::DownloadDuration,
            SettingsField::DownloadDuration => SettingsField::UploadDuration,
            SettingsField::UploadDuration => SettingsField::Display,
            SettingsField::Display => SettingsField::DownloadWorkers,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::DownloadWorkers => SettingsField::Display,
            SettingsField::UploadWorkers => SettingsField::DownloadWorkers,
            SettingsField::DownloadDuration => SettingsField::UploadWorkers,
            SettingsField::UploadDuration => SettingsField::DownloadDuration,
            SettingsField::Display => SettingsField::UploadDuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_server_and_endpoints() {
        let settings = Settings {
            server: "http://example.test:8000/".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.download_url(), "http://example.test:8000/api/download");
        assert_eq!(settings.clear_url(), "http://example.test:8000/api/clear");
        assert_eq!(settings.echo_url(), "ws://example.test:8000/ws");
        assert_eq!(settings.origin(), "http://example.test:8000");
    }

    #[test]
    fn secure_server_uses_wss() {
        let settings = Settings {
            server: "https://example.test".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.echo_url(), "wss://example.test/ws");
    }

    #[test]
    fn phase_durations_are_independent() {
        let args = Args::parse_from(["netgauge", "--download-secs", "7", "--upload-secs", "12"]);
        let settings = Settings::from(&args);
        assert_eq!(settings.download_interval(), Duration::from_secs(7));
        assert_eq!(settings.upload_interval(), Duration::from_secs(12));
    }

    #[test]
    fn requests_per_worker_default_and_floor() {
        let settings = Settings::from(&Args::parse_from(["netgauge"]));
        assert_eq!(settings.download_requests, DOWNLOAD_REQUESTS);
        assert_eq!(settings.upload_requests, UPLOAD_REQUESTS);

        let args = Args::parse_from(["netgauge", "--download-requests", "0", "--upload-requests", "3"]);
        let settings = Settings::from(&args);
        assert_eq!(settings.download_requests, 1);
        assert_eq!(settings.upload_requests, 3);
    }

    #[test]
    fn field_cycle_wraps() {
        let mut field = SettingsField::DownloadWorkers;
        for _ in 0..5 {
            field = field.next();
        }
        assert_eq!(field, SettingsField::DownloadWorkers);
        assert_eq!(SettingsField::DownloadWorkers.prev(), SettingsField::Display);
    }
}
