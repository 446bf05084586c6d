//! 领域模型错误定义
//!
//! 定义了通知领域中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验错误
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 事件缺少可解析的接收者或目标
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// 聚合桶键格式错误
    #[error("malformed bucket key: {key}")]
    MalformedBucketKey { key: String },

    /// 未知的通知类型
    #[error("unknown notification kind: {value}")]
    UnknownKind { value: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    pub fn malformed_bucket_key(key: impl Into<String>) -> Self {
        Self::MalformedBucketKey { key: key.into() }
    }
}

/// 持久层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// 目标记录不存在
    #[error("record not found")]
    NotFound,

    /// 唯一性冲突
    #[error("record conflict")]
    Conflict,

    /// 底层存储错误
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
