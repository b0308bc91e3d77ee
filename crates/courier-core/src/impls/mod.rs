//! Impls - ports の実装
//!
//! - **RedisStore**: 本番用（`redis` crate）
//! - **InMemoryStore**: 開発・テスト用

pub mod inmem_store;
pub mod redis_store;

pub use self::inmem_store::InMemoryStore;
pub use self::redis_store::RedisStore;
