use thiserror::Error;

use crate::app::builder::BuildError;
use crate::config::ConfigError;
use crate::domain::EncodeError;
use crate::ports::StoreError;

/// Everything a `Client` call can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
