//! App - アプリケーション層
//!
//! ports を組み合わせて producer 側のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **Broker**: キューへの投入と参照
//! - **ResultBackend**: 結果の取得と完了待ち
//! - **ClientBuilder**: クライアントの構築とワイヤリング
//! - **Client**: 上記をまとめたファサード

pub mod backend;
pub mod broker;
pub mod builder;
pub mod client;

// 主要な型を再エクスポート
pub use self::backend::{ResultBackend, ResultWatch};
pub use self::broker::{Broker, PreparedTask, PushEnd};
pub use self::builder::{BuildError, ClientBuilder};
pub use self::client::{Client, Submission};
