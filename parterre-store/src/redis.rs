use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamPendingReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisResult};

/// One delivered stream entry, decoded to plain string fields so callers
/// never touch command-level types.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub stream: String,
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// A pending (delivered, unacknowledged) entry as reported by the group.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub deliveries: u64,
}

// Compare-and-delete must run server-side as one unit; a GET/DEL pair from
// the client would race with expiry.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Capability client over the Redis-like store: SET-if-absent with TTL,
/// server-evaluated compare-and-delete, streams with consumer groups,
/// key/value with TTL, and pub/sub.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn connect(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        // Fail fast on an unreachable store.
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { client })
    }

    async fn conn(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Liveness probe for health endpoints.
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> RedisResult<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, 1).await
    }

    // ------------------------------------------------------------------
    // Lock primitives
    // ------------------------------------------------------------------

    /// SET key value NX EX ttl. Returns true iff the key was absent.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    /// Delete the key only if its current value equals `expected`, as one
    /// server-side unit. Returns true iff the key was deleted.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> RedisResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    // ------------------------------------------------------------------
    // Key/value with TTL
    // ------------------------------------------------------------------

    pub async fn put_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await
    }

    pub async fn get_string(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await
    }

    pub async fn delete(&self, key: &str) -> RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await
    }

    // ------------------------------------------------------------------
    // Streams with consumer groups
    // ------------------------------------------------------------------

    /// Create the consumer group (and the stream itself) if missing.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> RedisResult<()> {
        let mut conn = self.conn().await?;
        let created: RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Append an entry; the store assigns a monotonic id.
    pub async fn stream_append(&self, stream: &str, fields: &[(&str, String)]) -> RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.xadd(stream, "*", fields).await
    }

    /// Group-read new entries from one or more streams. `block_ms = None`
    /// returns immediately; `Some(ms)` suspends up to that long.
    pub async fn group_read(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> RedisResult<Vec<StreamMessage>> {
        let mut conn = self.conn().await?;
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        if let Some(ms) = block_ms {
            options = options.block(ms as usize);
        }
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();
        let reply: StreamReadReply = conn.xread_options(streams, &ids, &options).await?;
        Ok(flatten_read_reply(reply))
    }

    pub async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> RedisResult<u64> {
        let mut conn = self.conn().await?;
        conn.xack(stream, group, &[id]).await
    }

    pub async fn stream_len(&self, stream: &str) -> RedisResult<u64> {
        let mut conn = self.conn().await?;
        conn.xlen(stream).await
    }

    /// Total number of delivered-but-unacknowledged entries for the group.
    pub async fn pending_count(&self, stream: &str, group: &str) -> RedisResult<u64> {
        let mut conn = self.conn().await?;
        let reply: StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(match reply {
            StreamPendingReply::Empty => 0,
            StreamPendingReply::Data(data) => data.count as u64,
        })
    }

    /// Per-entry pending detail (consumer, idle time, delivery count).
    pub async fn pending_detail(&self, stream: &str, group: &str, count: usize) -> RedisResult<Vec<PendingEntry>> {
        let mut conn = self.conn().await?;
        let reply: StreamPendingCountReply = conn.xpending_count(stream, group, "-", "+", count).await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle_ms: p.last_delivered_ms as u64,
                deliveries: p.times_delivered as u64,
            })
            .collect())
    }

    /// Reassign pending entries to `consumer` if they have been idle at
    /// least `min_idle_ms`. Returns the claimed entries with their payloads.
    pub async fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> RedisResult<Vec<StreamMessage>> {
        let mut conn = self.conn().await?;
        let reply: StreamClaimReply = conn.xclaim(stream, group, consumer, min_idle_ms as usize, ids).await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| StreamMessage {
                stream: stream.to_string(),
                id: entry.id.clone(),
                fields: decode_field_map(entry.map),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Pub/sub
    // ------------------------------------------------------------------

    pub async fn publish(&self, channel: &str, payload: &str) -> RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, payload).await
    }

    /// Dedicated pub/sub connection for subscriber tasks.
    pub async fn pubsub(&self) -> RedisResult<redis::aio::PubSub> {
        self.client.get_async_pubsub().await
    }
}

fn flatten_read_reply(reply: StreamReadReply) -> Vec<StreamMessage> {
    let mut messages = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            messages.push(StreamMessage {
                stream: key.key.clone(),
                id: entry.id.clone(),
                fields: decode_field_map(entry.map),
            });
        }
    }
    messages
}

fn decode_field_map(map: HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(k, v)| redis::from_redis_value::<String>(&v).ok().map(|v| (k, v)))
        .collect()
}
