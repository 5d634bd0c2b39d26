//! # キュー名

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// 送信依頼を流すキューの既定名
pub const SEND_EMAIL_QUEUE: &str = "send-email";

/// キュー名（値オブジェクト）
///
/// AMQP の short string に収まる 1〜255 バイトの名前。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("{_0}")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() || value.len() > 255 {
            return Err(DomainError::Validation(format!(
                "キュー名は1〜255バイトである必要があります: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self(SEND_EMAIL_QUEUE.to_string())
    }
}
