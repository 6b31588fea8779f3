//! Relay server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::chat::{ConnectionRegistry, MessageRelay, SessionLifecycle};
use crate::store::{MemoryGateway, PersistenceGateway, SqliteGateway};

/// Which persistence gateway backs the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store kind: {}", other)),
        }
    }
}

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// SQLite database URL
    pub database_url: String,
    pub store: StoreKind,
    /// Origin allowed by CORS
    pub client_origin: String,
    /// Outbound events buffered per channel before new ones are dropped
    pub channel_buffer: usize,
    /// Default page size for recent messages
    pub recent_limit: u32,
    /// Upper bound on a requested page size
    pub max_recent_limit: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000),
            database_url: "sqlite:relay.sqlite".to_string(),
            store: StoreKind::Sqlite,
            client_origin: "http://localhost:3000".to_string(),
            channel_buffer: 64,
            recent_limit: 50,
            max_recent_limit: 500,
        }
    }
}

/// Read `key` from the environment, keeping `default` when it is unset or
/// does not parse.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring {}={:?}: {}", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

impl RelayConfig {
    /// Build from `HOST`, `PORT`, `DATABASE_URL`, `RELAY_STORE`, `CLIENT_URL`,
    /// `RELAY_CHANNEL_BUFFER` and `RELAY_RECENT_LIMIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env_or("HOST", defaults.bind_addr.ip());
        let port = env_or("PORT", defaults.bind_addr.port());

        Self {
            bind_addr: SocketAddr::new(host, port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            store: env_or("RELAY_STORE", defaults.store),
            client_origin: std::env::var("CLIENT_URL").unwrap_or(defaults.client_origin),
            channel_buffer: env_or("RELAY_CHANNEL_BUFFER", defaults.channel_buffer).max(1),
            recent_limit: env_or("RELAY_RECENT_LIMIT", defaults.recent_limit),
            max_recent_limit: defaults.max_recent_limit,
        }
    }

    /// Clamp a requested page size, falling back to the default.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.recent_limit)
            .clamp(1, self.max_recent_limit)
    }

    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
        Ok(match self.store {
            StoreKind::Sqlite => Arc::new(SqliteGateway::connect(&self.database_url).await?),
            StoreKind::Memory => Arc::new(MemoryGateway::new()),
        })
    }
}

/// App state shared across all handlers. The registry is created here and
/// nowhere else.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub store: Arc<dyn PersistenceGateway>,
    pub registry: Arc<ConnectionRegistry>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub relay: Arc<MessageRelay>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: RelayConfig, store: Arc<dyn PersistenceGateway>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let lifecycle = Arc::new(SessionLifecycle::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.channel_buffer,
        ));
        let relay = Arc::clone(lifecycle.relay());

        Self {
            config: Arc::new(config),
            store,
            registry,
            lifecycle,
            relay,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("SQLite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert!("mongo".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let config = RelayConfig::default();
        assert_eq!(config.page_size(None), 50);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(10_000)), 500);
        assert_eq!(config.page_size(Some(20)), 20);
    }

    #[test]
    fn test_state_shares_one_registry() {
        let state = AppState::new(RelayConfig::default(), Arc::new(MemoryGateway::new()));
        assert!(Arc::ptr_eq(&state.registry, state.lifecycle.registry()));
        assert!(Arc::ptr_eq(&state.relay, state.lifecycle.relay()));
    }
}
