use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::decoder::Framing;
use crate::errors::FlowError;
use crate::retry::RetryPolicy;

const DEFAULT_SENDER: &str = "User";

/// Server-side path returned by the upload endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadedFileRef {
    pub server_path: String,
}

impl UploadedFileRef {
    pub fn new(server_path: impl Into<String>) -> Self {
        Self {
            server_path: server_path.into(),
        }
    }
}

/// Called with `data.chunk` of every `token` event, before the event is
/// handed to the consumer.
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Inputs of one run-flow call.
#[derive(Clone)]
pub struct RunFlowRequest {
    pub message: String,
    /// Existing conversation to continue; a fresh id is generated when unset.
    pub session_id: Option<String>,
    pub sender_name: String,
    pub file: Option<UploadedFileRef>,
    pub on_token: Option<TokenCallback>,
    pub retry: RetryPolicy,
    pub framing: Framing,
}

impl fmt::Debug for RunFlowRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunFlowRequest")
            .field("message", &self.message)
            .field("session_id", &self.session_id)
            .field("sender_name", &self.sender_name)
            .field("file", &self.file)
            .field("on_token", &self.on_token.is_some())
            .field("retry", &self.retry)
            .field("framing", &self.framing)
            .finish()
    }
}

impl RunFlowRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            sender_name: DEFAULT_SENDER.to_string(),
            file: None,
            on_token: None,
            retry: RetryPolicy::default(),
            framing: Framing::default(),
        }
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn sender_name(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = sender_name.into();
        self
    }

    /// Attaches a previously uploaded file.
    pub fn file(mut self, file: UploadedFileRef) -> Self {
        self.file = Some(file);
        self
    }

    pub fn on_token(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Arc::new(callback));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    /// Forces a framing instead of detecting it from the response.
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), FlowError> {
        if self.message.trim().is_empty() && self.file.is_none() {
            return Err(FlowError::Validation(
                "message must not be empty unless a file is attached".into(),
            ));
        }
        if self.sender_name.trim().is_empty() {
            return Err(FlowError::Validation("sender_name must not be empty".into()));
        }
        Ok(())
    }
}

/// Component ids that receive tweaks in the run payload.
#[derive(Clone, Debug)]
pub(crate) struct TweakTargets {
    pub chat_input_id: String,
    pub file_input_id: String,
}

pub(crate) fn build_run_payload(
    req: &RunFlowRequest,
    session_id: &str,
    targets: &TweakTargets,
) -> serde_json::Value {
    let mut tweaks = serde_json::Map::new();
    tweaks.insert(
        targets.chat_input_id.clone(),
        json!({
            "sender": DEFAULT_SENDER,
            "sender_name": req.sender_name,
            "session_id": session_id,
        }),
    );
    if let Some(file) = &req.file {
        tweaks.insert(
            targets.file_input_id.clone(),
            json!({ "path": file.server_path }),
        );
    }
    json!({
        "output_type": "chat",
        "input_type": "chat",
        "input_value": req.message,
        "session_id": session_id,
        "tweaks": tweaks,
    })
}
