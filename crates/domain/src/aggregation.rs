//! 聚合桶键
//!
//! 桶以 `(通知类型, 目标, 接收者)` 为键，编码为缓存存储中的字符串键。

use serde::{Deserialize, Serialize};

use crate::entities::notification::NotificationKind;
use crate::errors::DomainError;
use crate::value_objects::UserId;

/// 缓存键前缀，末尾冒号是键段分隔符的一部分。
const BUCKET_PREFIX: &str = "agg:";

/// 聚合桶键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub kind: NotificationKind,
    pub target_id: String,
    pub recipient_id: UserId,
}

impl BucketKey {
    pub fn new(kind: NotificationKind, target_id: impl Into<String>, recipient_id: UserId) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            recipient_id,
        }
    }

    /// 编码为缓存键：`agg:{kind}:{target}:{recipient}`
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}:{}",
            BUCKET_PREFIX,
            self.kind.as_str(),
            self.target_id,
            self.recipient_id
        )
    }

    /// 从缓存键解析
    ///
    /// 目标ID可能本身含有冒号，所以接收者段从右侧切分。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let body = raw
            .strip_prefix(BUCKET_PREFIX)
            .ok_or_else(|| DomainError::malformed_bucket_key(raw))?;

        let (kind_str, rest) = body
            .split_once(':')
            .ok_or_else(|| DomainError::malformed_bucket_key(raw))?;
        let (target_id, recipient_str) = rest
            .rsplit_once(':')
            .ok_or_else(|| DomainError::malformed_bucket_key(raw))?;

        if target_id.is_empty() {
            return Err(DomainError::malformed_bucket_key(raw));
        }

        let kind = NotificationKind::parse(kind_str)
            .map_err(|_| DomainError::malformed_bucket_key(raw))?;
        let recipient_id = recipient_str
            .parse::<UserId>()
            .map_err(|_| DomainError::malformed_bucket_key(raw))?;

        Ok(Self {
            kind,
            target_id: target_id.to_string(),
            recipient_id,
        })
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
