//! Live-session and message-relay engine
//!
//! Tracks which users hold an open channel, broadcasts presence changes,
//! and routes messages and typing signals between channels.

pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod relay;

pub use lifecycle::{ChannelSession, ChannelState, SessionLifecycle};
pub use presence::PresenceBroadcaster;
pub use registry::{ChannelHandle, ChannelId, ConnectionRegistry, Session};
pub use relay::MessageRelay;
