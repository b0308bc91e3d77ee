//! courier-core
//!
//! Producer-side client for a Celery-compatible task queue on Redis:
//! submits tasks in the protocol v2 message format and watches for their
//! results.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, options, envelope, result）。I/O なし
//! - **ports**: 抽象化レイヤー（Store, Subscription, IdGenerator, Clock）
//! - **app**: アプリケーションロジック（broker, backend, builder, client）
//! - **impls**: 実装（RedisStore, InMemoryStore）
//! - **config**: ClientConfig
//! - **error**: ClientError

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use app::{BuildError, Client, ClientBuilder, ResultWatch, Submission};
pub use config::{ClientConfig, ConfigError};
pub use domain::{PartialTaskOptions, ResultMeta, StoredResult, TaskId, TaskResult, TimeSpec};
pub use error::ClientError;
pub use impls::{InMemoryStore, RedisStore};
pub use ports::StoreError;
