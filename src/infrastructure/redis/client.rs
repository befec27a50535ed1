use std::time::Duration;

use redis::{aio::MultiplexedConnection, Client, RedisError};
use tracing::info;

/// One multiplexed connection shared by every clone.
#[derive(Clone)]
pub struct RedisService {
    conn: MultiplexedConnection,
}

impl RedisService {
    pub async fn new(url: &str, connect_timeout: Duration) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| RedisError::from((redis::ErrorKind::IoError, "connect timed out")))??;

        info!("Connected to Redis");
        Ok(Self { conn })
    }

    pub fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}
