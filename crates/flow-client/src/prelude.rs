//! Common imports for typical client usage.
pub use crate::event::{ADD_MESSAGE_EVENT, END_EVENT, TOKEN_EVENT};
pub use crate::{
    ChatSurface, FlowClient, FlowClientConfig, FlowError, Framing, RetryPolicy, RunFlowRequest,
    RunStream, StreamEvent, TurnSummary, UploadedFileRef, drive_turn,
};
