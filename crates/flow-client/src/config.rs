use std::time::Duration;

use crate::errors::FlowError;

const DEFAULT_BASE_URL: &str = "http://localhost:7860";
const DEFAULT_FLOW_ID: &str = "e52d19f0-15d4-4dc4-9b96-a56e00f8c7b6";
const DEFAULT_CHAT_INPUT_ID: &str = "ChatInput-tu2Z3";
const DEFAULT_FILE_INPUT_ID: &str = "File-JFTKV";

/// Configuration for a `FlowClient`.
#[derive(Clone, Debug)]
pub struct FlowClientConfig {
    /// Base URL of the flow-execution service.
    pub base_url: String,
    /// Flow to run.
    pub flow_id: String,
    /// Component id of the chat input node; receives sender tweaks.
    pub chat_input_id: String,
    /// Component id of the file input node; receives the uploaded path.
    pub file_input_id: String,
    /// Optional API key, sent as `x-api-key`.
    pub api_key: Option<String>,
    /// Bound on starting a run (all attempts and backoff until the stream
    /// opens), and on each read gap while the body streams.
    pub timeout: Duration,
    /// Bound on each upload request.
    pub upload_timeout: Duration,
}

impl Default for FlowClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            flow_id: DEFAULT_FLOW_ID.to_string(),
            chat_input_id: DEFAULT_CHAT_INPUT_ID.to_string(),
            file_input_id: DEFAULT_FILE_INPUT_ID.to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(60),
        }
    }
}

impl FlowClientConfig {
    /// Creates a config for the given flow with default endpoints and timeouts.
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            ..Self::default()
        }
    }

    /// Builds a config from the process environment.
    ///
    /// Reads `LANGFLOW_API_URL`, `FLOW_ID`, `CHAT_INPUT_ID`, `FILE_INPUT_ID`,
    /// `LANGFLOW_API_KEY`, `FLOW_TIMEOUT_SECS` and `FLOW_UPLOAD_TIMEOUT_SECS`.
    /// Unset or blank variables keep their defaults.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FlowError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(v) = get("LANGFLOW_API_URL") {
            config.base_url = v;
        }
        if let Some(v) = get("FLOW_ID") {
            config.flow_id = v;
        }
        if let Some(v) = get("CHAT_INPUT_ID") {
            config.chat_input_id = v;
        }
        if let Some(v) = get("FILE_INPUT_ID") {
            config.file_input_id = v;
        }
        config.api_key = get("LANGFLOW_API_KEY");
        if let Some(v) = get("FLOW_TIMEOUT_SECS") {
            config.timeout = parse_secs("FLOW_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("FLOW_UPLOAD_TIMEOUT_SECS") {
            config.upload_timeout = parse_secs("FLOW_UPLOAD_TIMEOUT_SECS", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the service base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the chat input component id.
    pub fn chat_input_id(mut self, id: impl Into<String>) -> Self {
        self.chat_input_id = id.into();
        self
    }

    /// Overrides the file input component id.
    pub fn file_input_id(mut self, id: impl Into<String>) -> Self {
        self.file_input_id = id.into();
        self
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the run request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the upload request timeout.
    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), FlowError> {
        if self.base_url.trim().is_empty() {
            return Err(FlowError::Config("base_url must not be empty".into()));
        }
        if self.flow_id.trim().is_empty() {
            return Err(FlowError::Config("flow_id must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn run_url(&self) -> String {
        format!(
            "{}/api/v1/run/{}?stream=true",
            self.base_url.trim_end_matches('/'),
            self.flow_id
        )
    }

    pub(crate) fn upload_url(&self) -> String {
        format!("{}/api/v2/files", self.base_url.trim_end_matches('/'))
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, FlowError> {
    raw.parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| FlowError::Config(format!("{key} must be a positive number of seconds")))
}
