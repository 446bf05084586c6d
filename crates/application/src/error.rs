use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::bus::BusError;
use crate::cache::CacheError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("infrastructure error: {message}")]
    Infrastructure { message: String },
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
        }
    }
}

/// 应用层结果类型
pub type ApplicationResult<T> = Result<T, ApplicationError>;
