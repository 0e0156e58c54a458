//! Notification bridge: turns inbound mail events into turns of a live session.
//!
//! # Pipeline
//!
//! ```text
//! LifecycleController
//!   -> ConnectionManager::connect   (authenticated upgrade + subscribe)
//!   -> Connection::next_frame       (RawFrame, in arrival order)
//!   -> decode                       (Envelope | DecodeError, logged and skipped)
//!   -> classify                     (MessageReceived | Ignored)
//!   -> SessionBridge::handle        (interrupt, then generate_reply, awaited)
//! ```
//!
//! Only the initial connect error reaches the caller. Malformed frames, unknown event kinds
//! and session failures are contained inside the task; the conversation keeps running.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use inbox_bridge::Result;
//! use inbox_bridge::bridge::LifecycleController;
//! use inbox_bridge::config::ConnectionParams;
//! use inbox_bridge::session::{Session, Turn};
//! use inbox_bridge::ws::config::Config;
//!
//! struct Console;
//!
//! #[async_trait]
//! impl Session for Console {
//!     async fn interrupt(&self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn generate_reply(&self, instructions: &str, context: &str) -> Result<Turn> {
//!         println!("{instructions}\n{context}");
//!         Ok(Turn::builder().build())
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let params = ConnectionParams::from_env(["support@agentmail.to"])?;
//! let mut controller = LifecycleController::new(Config::default());
//! controller.on_session_enter(Arc::new(Console), params).await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod lifecycle;
pub mod types;

pub use handler::{DEFAULT_INSTRUCTIONS, Reaction, SessionBridge};
pub use lifecycle::{BridgeState, LifecycleController};
pub use types::request::{SubscribeRequest, Subscription};
pub use types::response::{DecodeError, Envelope, RecognizedEvent, classify, decode};
