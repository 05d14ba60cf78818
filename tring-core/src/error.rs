//! Crate-level error type.

use std::time::Duration;

use crate::config::ConfigError;
use crate::executor::ExecutorError;
use crate::http::HttpError;
use crate::marshal::MarshalError;

#[derive(Debug, thiserror::Error)]
pub enum TringError {
    #[error("no native calling engine: {0}")]
    NoNativeSupport(String),
    #[error("no active one-to-one call")]
    NoActiveCall,
    #[error("no active group call client")]
    NoGroupClient,
    #[error("native engine rejected group call client creation")]
    GroupClientRejected,
    #[error("call link parse timed out after {0:?}")]
    CallLinkTimeout(Duration),
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TringError>;
