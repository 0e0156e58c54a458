//! Listens to one inbox and logs every turn the bridge would ask a voice session for.
//!
//! The session here is a stand-in that only logs; a real deployment plugs in the voice engine.
//!
//! Run with:
//! ```sh
//! AGENTMAIL_API_KEY=am_... RUST_LOG=info,inbox_bridge=debug \
//!     cargo run --example inbox_listener -- support@agentmail.to
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use inbox_bridge::Result;
use inbox_bridge::bridge::LifecycleController;
use inbox_bridge::config::ConnectionParams;
use inbox_bridge::inbox::{self, DEFAULT_THREAD_LIMIT};
use inbox_bridge::session::{Session, Turn};
use inbox_bridge::ws::config::{Config, ReconnectConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct LoggingSession;

#[async_trait]
impl Session for LoggingSession {
    async fn interrupt(&self) -> Result<()> {
        info!("interrupt");
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str, context: &str) -> Result<Turn> {
        info!(%instructions, %context, "generate_reply");
        Ok(Turn::builder().build())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let inbox_id = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: inbox_listener <inbox_id>"))?;

    let session: Arc<dyn Session> = Arc::new(LoggingSession);

    match inbox::Client::from_env() {
        Ok(client) => {
            if let Err(e) =
                inbox::greet(&client, session.as_ref(), &inbox_id, DEFAULT_THREAD_LIMIT).await
            {
                warn!(error = %e, "Skipping greeting");
            }
        }
        Err(e) => warn!(error = %e, "Inbox API unavailable"),
    }

    let params = ConnectionParams::from_env([inbox_id])?;
    let config = Config::default().with_reconnect(ReconnectConfig::default());
    let mut controller = LifecycleController::new(config);

    controller.on_session_enter(session, params).await?;
    info!(task_id = ?controller.task_id(), "Listening; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    controller.on_session_exit().await;
    info!(state = ?controller.state(), "Stopped");

    Ok(())
}
