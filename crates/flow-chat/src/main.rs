mod config;
mod console;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use flow_client::observability::init_observability;
use flow_client::{FlowClient, RunFlowRequest, drive_turn};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{debug, info};

use crate::console::{ConsoleSurface, describe_error};

/// Chat with a streaming flow from the terminal.
///
/// Endpoint settings come from the environment (or a `.env` file):
/// `LANGFLOW_API_URL`, `FLOW_ID`, `CHAT_INPUT_ID`, `FILE_INPUT_ID`,
/// `LANGFLOW_API_KEY`.
#[derive(Debug, Parser)]
#[command(name = "flow-chat", version)]
struct Args {
    /// Send one message and exit. Without it, read messages from stdin.
    message: Option<String>,

    /// Continue an existing conversation.
    #[arg(long)]
    session_id: Option<String>,

    #[arg(long, default_value = "User")]
    sender_name: String,

    /// Upload this file and attach it to the first message.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Retries after HTTP 429 before giving up.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Base backoff in seconds, doubled on every retry.
    #[arg(long, default_value_t = 2.0)]
    base_delay_secs: f64,

    /// Read endpoint settings from this dotenv file instead of `./.env`.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl Args {
    fn base_delay(&self) -> anyhow::Result<Duration> {
        Duration::try_from_secs_f64(self.base_delay_secs)
            .context("--base-delay-secs must be a non-negative number of seconds")
    }
}

struct Chat {
    client: FlowClient,
    session_id: Option<String>,
    sender_name: String,
    max_retries: u32,
    base_delay: Duration,
}

impl Chat {
    /// Runs one turn. Failures are reported to the user and leave the session
    /// unchanged.
    async fn turn(&mut self, message: &str, file: Option<&Path>) -> bool {
        match self.try_turn(message, file).await {
            Ok(()) => true,
            Err(err) => {
                let text = match err.downcast_ref::<flow_client::FlowError>() {
                    Some(flow_err) => describe_error(flow_err),
                    None => format!("Error: {err:#}"),
                };
                eprintln!("{text}");
                false
            }
        }
    }

    async fn try_turn(&mut self, message: &str, file: Option<&Path>) -> anyhow::Result<()> {
        let mut request = RunFlowRequest::new(message)
            .sender_name(self.sender_name.clone())
            .max_retries(self.max_retries)
            .base_delay(self.base_delay);
        if let Some(session_id) = &self.session_id {
            request = request.session_id(session_id.clone());
        }
        if let Some(path) = file {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("file path has no usable file name")?;
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let uploaded = self.client.upload_file(bytes, filename).await?;
            request = request.file(uploaded);
        }

        let run = self.client.run_flow_stream(request).await?;
        let sent_session = run.session_id().to_string();
        let mut surface = ConsoleSurface::stdio();
        let summary = drive_turn(run, &mut surface).await?;

        let session_id = summary.session_id.unwrap_or(sent_session);
        info!(event = "chat.turn_finished", session_id = %session_id, tools = summary.tools.len());
        self.session_id = Some(session_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let env_file = config::load_env(args.env_file.as_deref())?;
    init_observability();
    if let Some(path) = &env_file {
        debug!(event = "chat.env_loaded", path = %path.display());
    }
    let base_delay = args.base_delay()?;
    let client = FlowClient::from_env().context("flow endpoint configuration")?;

    let mut chat = Chat {
        client,
        session_id: args.session_id.clone(),
        sender_name: args.sender_name.clone(),
        max_retries: args.max_retries,
        base_delay,
    };

    if let Some(message) = args.message.as_deref() {
        if !chat.turn(message, args.file.as_deref()).await {
            std::process::exit(1);
        }
        return Ok(());
    }

    eprintln!("Type a message and press enter. /quit exits.");
    let mut pending_file = args.file.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() && pending_file.is_none() {
            continue;
        }
        if chat.turn(line, pending_file.as_deref()).await {
            pending_file = None;
        }
    }
    if let Some(session_id) = &chat.session_id {
        eprintln!("session: {session_id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_client_retry_policy() {
        let args = Args::try_parse_from(["flow-chat", "hi"]).expect("parse");
        assert_eq!(args.message.as_deref(), Some("hi"));
        assert_eq!(args.sender_name, "User");
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.base_delay().expect("delay"), Duration::from_secs(2));
        assert!(args.file.is_none() && args.session_id.is_none());
        assert!(args.env_file.is_none());
    }

    #[test]
    fn accepts_session_file_and_retry_flags() {
        let args = Args::try_parse_from([
            "flow-chat",
            "--session-id",
            "s-1",
            "--file",
            "notes.txt",
            "--max-retries",
            "0",
            "--base-delay-secs",
            "0.5",
        ])
        .expect("parse");
        assert!(args.message.is_none());
        assert_eq!(args.session_id.as_deref(), Some("s-1"));
        assert_eq!(args.file, Some(PathBuf::from("notes.txt")));
        assert_eq!(args.max_retries, 0);
        assert_eq!(args.base_delay().expect("delay"), Duration::from_millis(500));
    }

    #[test]
    fn rejects_negative_base_delay() {
        let args =
            Args::try_parse_from(["flow-chat", "--base-delay-secs=-1", "hi"]).expect("parse");
        assert!(args.base_delay().is_err());
    }

    #[test]
    fn rejects_base_delay_beyond_duration_range() {
        let args =
            Args::try_parse_from(["flow-chat", "--base-delay-secs", "1e30", "hi"]).expect("parse");
        assert!(args.base_delay().is_err());
    }
}
