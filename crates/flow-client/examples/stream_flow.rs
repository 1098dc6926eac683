use std::io::Write as _;

use futures::StreamExt as _;
use flow_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), FlowError> {
    flow_client::observability::init_observability();
    let client = FlowClient::from_env()?;

    let mut run = client
        .run_flow_stream(
            RunFlowRequest::new("Stream a short greeting.").on_token(|chunk| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }),
        )
        .await?;

    while let Some(event) = run.next().await {
        let event = event?;
        if event.is(END_EVENT) {
            println!();
            if let Some(session_id) = event.session_id() {
                eprintln!("session: {session_id}");
            }
        }
    }
    Ok(())
}
