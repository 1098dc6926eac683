use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_FILTER: &str = "warn";
const DEFAULT_LOG_FILE: &str = "flow-client.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogSink {
    /// Compact text on stderr; stdout is left to streamed response text.
    Stderr,
    /// One flattened JSON object per line, appended to this file.
    JsonFile(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    filter: Option<String>,
    sink: LogSink,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let enabled = get("FLOW_OBSERVABILITY_ENABLED")
            .and_then(|v| parse_switch(&v))
            .unwrap_or(true);
        let filter = get("FLOW_LOG_LEVEL")
            .filter(|level| EnvFilter::try_new(level).is_ok())
            .or_else(|| get("RUST_LOG"));
        let sink = match get("FLOW_JSON_LOG_PATH") {
            Some(path) => LogSink::JsonFile(PathBuf::from(path)),
            None => LogSink::Stderr,
        };
        Self {
            enabled,
            filter,
            sink,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file)
}

/// Installs the process-wide log subscriber; later calls do nothing.
///
/// - `FLOW_OBSERVABILITY_ENABLED`: `off`/`false`/`0` disables logging.
/// - `FLOW_LOG_LEVEL`, else `RUST_LOG`: filter directives (default `warn`).
/// - `FLOW_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_lookup(|key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }
        let filter = settings.env_filter();
        match &settings.sink {
            LogSink::JsonFile(path) => {
                let (dir, file) = split_log_path(path);
                let _ = std::fs::create_dir_all(dir);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            LogSink::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}
