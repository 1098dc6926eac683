use std::io::Write;

use flow_client::agent_steps::{RUNNING_PLACEHOLDER, format_tool_input, format_tool_output};
use flow_client::{ChatSurface, FlowError};
use serde_json::Value;

/// Terminal rendering of a turn: response text on `out`, tool steps on `err`.
pub struct ConsoleSurface<O, E> {
    out: O,
    err: E,
    steps: usize,
    streamed: bool,
}

impl ConsoleSurface<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<O: Write + Send, E: Write + Send> ConsoleSurface<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            steps: 0,
            streamed: false,
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

#[async_trait::async_trait]
impl<O: Write + Send, E: Write + Send> ChatSurface for ConsoleSurface<O, E> {
    type Step = usize;

    async fn create_step(&mut self, name: &str, input: &Value) -> usize {
        self.steps += 1;
        let _ = writeln!(
            self.err,
            "[tool #{}] {name}\n{}\n  {RUNNING_PLACEHOLDER}",
            self.steps,
            format_tool_input(input)
        );
        self.steps
    }

    async fn update_step(&mut self, step: &mut usize, output: &Value) {
        let _ = writeln!(
            self.err,
            "[tool #{step}] output:\n{}",
            format_tool_output(output)
        );
    }

    async fn stream_token(&mut self, chunk: &str) {
        self.streamed = true;
        let _ = write!(self.out, "{chunk}");
        let _ = self.out.flush();
    }

    async fn send_message(&mut self, text: &str) {
        // Streamed text is already on screen; only terminate the line.
        if std::mem::take(&mut self.streamed) {
            let _ = writeln!(self.out);
        } else {
            let _ = writeln!(self.out, "{text}");
        }
        let _ = self.out.flush();
    }
}

/// User-facing text for a failed turn; rate limiting reads differently from
/// other failures.
pub fn describe_error(err: &FlowError) -> String {
    match err {
        FlowError::RateLimitExceeded {
            retry_after: Some(delay),
        } => format!(
            "The flow service is rate limiting requests. Try again in {}s.",
            delay.as_secs().max(1)
        ),
        FlowError::RateLimitExceeded { retry_after: None } => {
            "The flow service is rate limiting requests. Try again shortly.".to_string()
        }
        FlowError::Upload { status, .. } => format!("File upload was rejected (HTTP {status})."),
        other => format!("Error: {other}"),
    }
}
