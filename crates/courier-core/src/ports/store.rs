//! Store port - Redis 互換ストア（list / hash / sorted set / string / pub-sub）
//!
//! The client only ever issues single commands: there are no transactions and
//! no retries at this layer. Each method maps to exactly one store command
//! (or, for `subscribe`, one dedicated connection plus SUBSCRIBE).
//!
//! # 実装
//! - **RedisStore**: 本番用（`impls::redis_store`）
//! - **InMemoryStore**: テスト・開発用（`impls::inmem_store`）

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Any failure reported by the Redis client, surfaced as-is.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("subscription to channel {channel} closed before a message arrived")]
    SubscriptionClosed { channel: String },
}

/// Store は Redis のコマンド集合を抽象化
///
/// Values are passed as `String` for list/hash members (envelopes are JSON
/// text) and as bytes for result keys, which the external worker may fill
/// with anything.
#[async_trait]
pub trait Store: Send + Sync {
    /// LPUSH: insert at the head of the list.
    async fn lpush(&self, list: &str, value: String) -> Result<(), StoreError>;

    /// RPUSH: insert at the tail of the list.
    async fn rpush(&self, list: &str, value: String) -> Result<(), StoreError>;

    /// LRANGE list 0 -1
    async fn lrange_all(&self, list: &str) -> Result<Vec<String>, StoreError>;

    /// HGETALL
    async fn hgetall(&self, hash: &str) -> Result<HashMap<String, String>, StoreError>;

    /// ZRANGE key 0 -1 (ascending score order, members only)
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// GET
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// KEYS pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// MGET, one slot per requested key.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// SUBSCRIBE on a dedicated connection.
    ///
    /// Returns only after the store has acknowledged the subscription, so a
    /// message published after this call resolves is guaranteed to be seen.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError>;
}

/// A live single-channel subscription.
///
/// Dropping it releases the underlying connection; `close` additionally
/// unsubscribes cleanly first.
#[async_trait]
pub trait Subscription: Send {
    fn channel(&self) -> &str;

    /// Wait for the next message payload on the channel.
    ///
    /// Cancel-safe: dropping the returned future loses no buffered message.
    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError>;

    /// UNSUBSCRIBE and release the connection.
    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}
