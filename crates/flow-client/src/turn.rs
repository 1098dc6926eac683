//! Reconciles one chat turn's events with a UI surface.

use std::collections::HashMap;

use futures::StreamExt as _;
use serde_json::Value;
use tracing::debug;

use crate::agent_steps::{ToolCall, extract_agent_steps, final_tool_calls, has_content};
use crate::errors::FlowError;
use crate::event::{ADD_MESSAGE_EVENT, END_EVENT, StreamEvent, TOKEN_EVENT};

/// UI collaborator that renders a turn.
///
/// `Step` is an opaque handle to a displayed tool step.
#[async_trait::async_trait]
pub trait ChatSurface: Send {
    type Step: Send;

    /// Displays a new tool step, initially without output.
    async fn create_step(&mut self, name: &str, input: &Value) -> Self::Step;

    /// Sets the output of a displayed step.
    async fn update_step(&mut self, step: &mut Self::Step, output: &Value);

    /// Renders incremental response text.
    async fn stream_token(&mut self, chunk: &str);

    /// Sends the complete response once the stream has ended.
    async fn send_message(&mut self, text: &str);
}

/// Outcome of a finished turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnSummary {
    /// Concatenated `token` chunks.
    pub response: String,
    /// Session id reported by the `end` event, if any.
    pub session_id: Option<String>,
    /// Tools in the order they were first displayed, with their final output.
    pub tools: Vec<ToolCall>,
}

/// Per-turn reconciliation state: displayed steps keyed by tool name.
pub struct TurnState<S> {
    steps: HashMap<String, (usize, S)>,
    summary: TurnSummary,
}

impl<S> Default for TurnState<S> {
    fn default() -> Self {
        Self {
            steps: HashMap::new(),
            summary: TurnSummary::default(),
        }
    }
}

impl<S: Send> TurnState<S> {
    /// Applies one event, calling into `surface` as needed.
    pub async fn apply<C>(&mut self, event: &StreamEvent, surface: &mut C)
    where
        C: ChatSurface<Step = S>,
    {
        match event.event.as_str() {
            ADD_MESSAGE_EVENT => {
                for tool in extract_agent_steps(&event.data).tools {
                    if tool.name.is_empty() || self.steps.contains_key(&tool.name) {
                        continue;
                    }
                    debug!(event = "turn.tool_step_created", tool = %tool.name);
                    let step = surface.create_step(&tool.name, &tool.input).await;
                    let index = self.summary.tools.len();
                    self.steps.insert(tool.name.clone(), (index, step));
                    self.summary.tools.push(ToolCall {
                        output: None,
                        ..tool
                    });
                }
            }
            TOKEN_EVENT => {
                if let Some(chunk) = event.token_chunk().filter(|c| !c.is_empty()) {
                    self.summary.response.push_str(chunk);
                    surface.stream_token(chunk).await;
                }
            }
            END_EVENT => {
                if let Some(session_id) = event.session_id() {
                    self.summary.session_id = Some(session_id.to_string());
                }
                for tool in final_tool_calls(&event.data) {
                    let Some(output) = tool.output.filter(has_content) else {
                        continue;
                    };
                    let Some((index, step)) = self.steps.get_mut(&tool.name) else {
                        continue;
                    };
                    debug!(event = "turn.tool_step_updated", tool = %tool.name);
                    surface.update_step(step, &output).await;
                    self.summary.tools[*index].output = Some(output);
                }
            }
            _ => {}
        }
    }

    pub fn summary(&self) -> &TurnSummary {
        &self.summary
    }

    pub fn into_summary(self) -> TurnSummary {
        self.summary
    }
}

/// Consumes a run's events, rendering them on `surface`, and sends the final
/// response when the stream ends. A stream error aborts the turn before any
/// message is sent.
pub async fn drive_turn<St, C>(mut events: St, surface: &mut C) -> Result<TurnSummary, FlowError>
where
    St: futures::Stream<Item = Result<StreamEvent, FlowError>> + Unpin,
    C: ChatSurface,
{
    let mut state = TurnState::<C::Step>::default();
    while let Some(event) = events.next().await {
        state.apply(&event?, surface).await;
    }
    let summary = state.into_summary();
    if !summary.response.is_empty() {
        surface.send_message(&summary.response).await;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<String>,
        next_step: usize,
    }

    #[async_trait::async_trait]
    impl ChatSurface for RecordingSurface {
        type Step = usize;

        async fn create_step(&mut self, name: &str, input: &Value) -> usize {
            self.next_step += 1;
            self.calls.push(format!("create:{name}:{input}"));
            self.next_step
        }

        async fn update_step(&mut self, step: &mut usize, output: &Value) {
            self.calls.push(format!("update:{step}:{output}"));
        }

        async fn stream_token(&mut self, chunk: &str) {
            self.calls.push(format!("token:{chunk}"));
        }

        async fn send_message(&mut self, text: &str) {
            self.calls.push(format!("send:{text}"));
        }
    }

    fn event(value: Value) -> Result<StreamEvent, FlowError> {
        Ok(StreamEvent::from_lenient(value))
    }

    fn tool_message(tools: Value) -> Value {
        json!({"content_blocks": [{"title": "Agent Steps", "contents": tools}]})
    }

    #[tokio::test]
    async fn reconciles_tool_steps_tokens_and_session() {
        let calc = json!({"type": "tool_use", "name": "calc", "tool_input": {"x": 1}});
        let calc_done = json!({"type": "tool_use", "name": "calc", "tool_input": {"x": 1}, "output": "2"});
        let unknown_done = json!({"type": "tool_use", "name": "other", "output": "z"});
        let events = stream::iter(vec![
            event(json!({"event": "add_message", "data": tool_message(json!([calc.clone()]))})),
            event(json!({"event": "add_message", "data": tool_message(json!([calc, {"type": "tool_use", "name": ""}]))})),
            event(json!({"event": "token", "data": {"chunk": "It is "}})),
            event(json!({"event": "token", "data": {"chunk": ""}})),
            event(json!({"event": "token", "data": {"chunk": "2"}})),
            event(json!({"event": "end", "data": {"result": {
                "session_id": "s-9",
                "outputs": [{"outputs": [{"results": {"message": tool_message(json!([calc_done, unknown_done]))}}]}]
            }}})),
        ]);
        let mut surface = RecordingSurface::default();
        let summary = drive_turn(events, &mut surface).await.expect("turn");

        assert_eq!(
            surface.calls,
            vec![
                "create:calc:{\"x\":1}",
                "token:It is ",
                "token:2",
                "update:1:\"2\"",
                "send:It is 2",
            ]
        );
        assert_eq!(summary.response, "It is 2");
        assert_eq!(summary.session_id.as_deref(), Some("s-9"));
        assert_eq!(summary.tools.len(), 1);
        assert_eq!(summary.tools[0].output, Some(json!("2")));
    }

    #[tokio::test]
    async fn stream_error_aborts_without_sending() {
        let events = stream::iter(vec![
            event(json!({"event": "token", "data": {"chunk": "partial"}})),
            Err(FlowError::Transport("reset".into())),
        ]);
        let mut surface = RecordingSurface::default();
        let result = drive_turn(events, &mut surface).await;
        assert!(matches!(result, Err(FlowError::Transport(_))));
        assert_eq!(surface.calls, vec!["token:partial"]);
    }

    #[tokio::test]
    async fn empty_response_sends_nothing() {
        let events = stream::iter(vec![event(json!({"event": "end", "data": {}}))]);
        let mut surface = RecordingSurface::default();
        let summary = drive_turn(events, &mut surface).await.expect("turn");
        assert!(surface.calls.is_empty());
        assert_eq!(summary, TurnSummary::default());
    }
}
