use crate::channels::ChannelRegistry;
use crate::core::config::AppConfig;
use crate::core::error::{AppError, AppResult};
use crate::realtime::SocketEvent;
use crate::shared::utils::DbPool;
use diesel::PgConnection;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the live-update fan-out; slower sockets skip what they missed.
pub const EVENT_BUFFER: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: Arc<AppConfig>,
    /// Broadcast channel feeding every connected websocket
    pub events: broadcast::Sender<SocketEvent>,
    pub channels: Arc<ChannelRegistry>,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig, channels: ChannelRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            conn,
            config: Arc::new(config),
            events,
            channels: Arc::new(channels),
        }
    }

    /// Runs diesel work on the blocking pool. The pooled connection is checked
    /// out inside the task and returned before the future resolves, so callers
    /// never hold one across an `.await`.
    pub async fn run_db<T, F>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut *conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Database task failed: {e}")))?
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("conn", &"DbPool")
            .field("config", &self.config)
            .field("events", &self.events.receiver_count())
            .field("channels", &self.channels)
            .finish()
    }
}
