//! HTTP and WebSocket handlers

pub mod health;
pub mod messages;
pub mod users;
pub mod ws;

// Re-export AppState from config
pub use crate::config::AppState;

pub use health::health_check;
pub use messages::{
    create_message, delete_message, get_conversation, get_message_stats, get_recent_messages,
};
pub use users::{get_presence, list_online_users};
pub use ws::ws_upgrade;
