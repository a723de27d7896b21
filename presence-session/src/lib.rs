//! presence-session: session state, event routing and transport
//!
//! Provides:
//! - The agent session state machine (state + emotion)
//! - The inbound event router feeding the stream buffer
//! - WebSocket client transport and server-side broadcaster
//! - A UI-paced presence sampler and the pipeline that wires it all together

pub mod broadcaster;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod presence;
pub mod render_feed;
pub mod router;
pub mod session;

pub use broadcaster::{BroadcasterHandle, PresenceBroadcaster};
pub use client::{parse_server_url, run_client, ClientExit};
pub use error::PresenceError;
pub use pipeline::PresencePipeline;
pub use presence::{IntensitySource, PresenceFrame, PresenceSampler};
pub use render_feed::{RenderFeed, SessionUpdate};
pub use router::{DropReason, EventRouter, RouteOutcome};
pub use session::{transition, SessionInput, SessionMachine, SessionSnapshot, StateChange};
