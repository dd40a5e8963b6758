//! Redis-backed store

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{KeyValueStore, EVENT_CHANNEL_CAPACITY, NOTIFY_PARAM};
use crate::error::{StoreError, StoreResult};

/// Keys requested per SCAN round trip.
const SCAN_COUNT: usize = 1000;

/// Store backed by a Redis server.
///
/// Commands share one multiplexed connection; the set-event subscription
/// opens its own pub/sub connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    db: i64,
}

impl RedisStore {
    /// Connect to the server at `url` (database `db` must match the URL).
    pub async fn connect(url: &str, db: i64) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn, db })
    }

    /// Pattern for set events of this database.
    pub fn set_event_pattern(&self) -> String {
        format!("__keyevent@{}__:set", self.db)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn scan_keys(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            for raw in batch {
                match String::from_utf8(raw) {
                    Ok(key) => keys.push(key),
                    Err(err) => debug!(key = ?err.as_bytes(), "skipping non-UTF-8 key"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn is_scalar(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let kind: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        Ok(kind == "string")
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(value) => Ok(value),
            // Key was replaced by a non-scalar between TYPE and GET
            Err(err) if err.kind() == redis::ErrorKind::TypeError => Ok(None),
            Err(err) if err.code() == Some("WRONGTYPE") => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn notification_flags(&self) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg(NOTIFY_PARAM)
            .query_async(&mut conn)
            .await?;
        reply
            .into_iter()
            .nth(1)
            .ok_or_else(|| StoreError::Protocol(format!("CONFIG GET {} returned nothing", NOTIFY_PARAM)))
    }

    async fn set_notification_flags(&self, flags: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg(NOTIFY_PARAM)
            .arg(flags)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe_set_events(&self) -> StoreResult<mpsc::Receiver<String>> {
        let pattern = self.set_event_pattern();
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(&pattern).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(msg) = messages.next().await {
                let key: String = match msg.get_payload() {
                    Ok(key) => key,
                    Err(err) => {
                        warn!(error = %err, "ignoring undecodable set event");
                        continue;
                    }
                };
                if tx.send(key).await.is_err() {
                    // Listener went away
                    return;
                }
            }
            debug!(pattern = %pattern, "set-event subscription ended");
        });

        Ok(rx)
    }
}
