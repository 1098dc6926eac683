//! Streaming client for a flow-execution HTTP endpoint.
//!
//! A run is one streamed POST. The response body is decoded incrementally into
//! `{event, data}` records that are handed out as they complete; HTTP 429
//! answers are retried with backoff and files can be uploaded ahead of a run.
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use flow_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FlowError> {
//! let client = FlowClient::from_env()?;
//!
//! let mut run = client
//!     .run_flow_stream(RunFlowRequest::new("Say hello").on_token(|chunk| print!("{chunk}")))
//!     .await?;
//!
//! while let Some(event) = run.next().await {
//!     if event?.is(END_EVENT) {
//!         println!();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Tool-call descriptors carried in message payloads.
pub mod agent_steps;
/// Run and upload operations.
pub mod client;
/// Endpoint configuration.
pub mod config;
/// Incremental event reconstruction from response bodies.
pub mod decoder;
/// Public error type.
pub mod errors;
/// Reconstructed stream events.
pub mod event;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Run request inputs and payload construction.
pub mod request;
/// Rate-limit retry state and backoff sleeping.
pub mod retry;
/// HTTP seam used by the client.
pub mod transport;
/// Per-turn reconciliation with a chat UI.
pub mod turn;

pub use agent_steps::{AgentSteps, ToolCall, extract_agent_steps, final_tool_calls};
pub use client::{FlowClient, RunStream};
pub use config::FlowClientConfig;
pub use decoder::{EventReconstructor, Framing};
pub use errors::FlowError;
pub use event::StreamEvent;
pub use request::{RunFlowRequest, TokenCallback, UploadedFileRef};
pub use retry::{RetryPolicy, RetryState, Sleeper, TokioSleeper};
pub use transport::{FlowTransport, HttpReply, ReqwestTransport};
pub use turn::{ChatSurface, TurnState, TurnSummary, drive_turn};
