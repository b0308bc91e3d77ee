//! ClientBuilder - クライアントの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use crate::app::backend::ResultBackend;
use crate::app::broker::Broker;
use crate::app::client::Client;
use crate::config::{ClientConfig, ConfigError};
use crate::domain::{Canonicalizer, PartialTaskOptions};
use crate::ports::{IdGenerator, Store, UuidGenerator};

/// ClientBuilder は Client を構築
///
/// # 使用例
/// ```ignore
/// let client = ClientBuilder::new()
///     .store(InMemoryStore::new())
///     .config(ClientConfig::default())
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store が未設定なら BuildError::MissingStore
/// - config が不正なら BuildError::InvalidConfig
pub struct ClientBuilder {
    store: Option<Arc<dyn Store>>,
    config: ClientConfig,
    ids: Arc<dyn IdGenerator>,
}

/// BuildError はクライアント構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no store configured. Call ClientBuilder::store before build.")]
    MissingStore,

    #[error("invalid client configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            config: ClientConfig::default(),
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace `config.default_options`.
    pub fn default_options(mut self, options: PartialTaskOptions) -> Self {
        self.config.default_options = options;
        self
    }

    /// デフォルトは UuidGenerator
    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// # 検証
    /// - store が設定されているか
    /// - `ClientConfig::validate`
    pub fn build(self) -> Result<Client, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        self.config.validate()?;

        let config = self.config;
        let canonicalizer = Canonicalizer::new(self.ids, config.default_queue.clone());
        let broker = Broker::new(
            Arc::clone(&store),
            config.scheduled_hash.clone(),
            config.scheduled_index.clone(),
        );
        let backend = ResultBackend::new(store, config.result_key_prefix.clone());

        tracing::info!(
            default_queue = %config.default_queue,
            result_key_prefix = %config.result_key_prefix,
            result_wait_timeout_ms = config.result_wait_timeout_ms,
            "client ready"
        );

        Ok(Client::from_parts(
            broker,
            backend,
            canonicalizer,
            config.default_options.clone(),
            config.result_wait_timeout(),
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;

    #[test]
    fn test_build_success() {
        let client = ClientBuilder::new().store(InMemoryStore::new()).build();
        assert!(client.is_ok());
        assert_eq!(client.unwrap().default_queue(), "celery");
    }

    #[test]
    fn test_build_missing_store() {
        let client = ClientBuilder::new().build();
        assert!(matches!(client, Err(BuildError::MissingStore)));
    }

    #[test]
    fn test_build_invalid_config() {
        let config = ClientConfig {
            default_queue: String::new(),
            ..ClientConfig::default()
        };
        let client = ClientBuilder::new()
            .store(InMemoryStore::new())
            .config(config)
            .build();
        assert!(matches!(
            client,
            Err(BuildError::InvalidConfig(ConfigError::Empty("default_queue")))
        ));
    }

    #[test]
    fn test_build_uses_configured_queue() {
        let config = ClientConfig {
            default_queue: "math".to_string(),
            ..ClientConfig::default()
        };
        let client = ClientBuilder::new()
            .store(InMemoryStore::new())
            .config(config)
            .build()
            .unwrap();
        assert_eq!(client.default_queue(), "math");
    }

    #[tokio::test]
    async fn test_build_with_ulid_ids() {
        use crate::ports::{FixedClock, UlidGenerator};
        use chrono::{TimeZone, Utc};

        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let client = ClientBuilder::new()
            .store(InMemoryStore::new())
            .id_generator(UlidGenerator::new(FixedClock::new(at)))
            .build()
            .unwrap();

        let id = client
            .submit("t", &[1], &serde_json::json!({}), &PartialTaskOptions::new())
            .await
            .unwrap();
        let ulid: ulid::Ulid = id.as_str().parse().unwrap();
        assert_eq!(ulid.timestamp_ms(), at.timestamp_millis() as u64);
    }
}
