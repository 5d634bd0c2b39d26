//! キュー投入
//!
//! 送信依頼を JSON エンベロープにシリアライズし、既定 exchange 経由で
//! キューへ publish する。publisher confirm は使わない（fire-and-forget）。
//! ブローカーがフレームを受け付けた時点で成功とみなすため、受付から永続化の
//! 間にブローカーが落ちるとメッセージは黙って失われうる。

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lapin::{BasicProperties, options::BasicPublishOptions};
use postbox_domain::{EmailMessage, QueueName};

use super::{ChannelPool, DEFAULT_EXCHANGE, JSON_CONTENT_TYPE, declare_queue};
use crate::InfraError;

/// キュー投入トレイト
///
/// 失敗時は段階ごとの種別（接続・チャネル・キュー宣言・シリアライズ・publish）を
/// 持つ [`InfraError`] を返す。内部で再試行はしない。
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// メッセージをキューに投入する
    async fn publish(&self, queue: &QueueName, message: &EmailMessage) -> Result<(), InfraError>;
}

/// AMQP キュー投入
///
/// 1 回の投入は次の手順で行う:
///
/// 1. プールから接続とチャネルを借りる（なければ接続してチャネルを開く）
/// 2. キューを宣言する（durable / 非 exclusive / 非 auto-delete、冪等）
/// 3. メッセージを JSON エンベロープにシリアライズする
/// 4. 既定 exchange に routing key = キュー名で publish する
///    （mandatory / immediate なし、content-type `application/json`）
/// 5. チャネルをプールに返却する
pub struct AmqpPublisher {
    pool: ChannelPool,
}

impl AmqpPublisher {
    /// 既定のプールサイズ
    pub const DEFAULT_POOL_SIZE: NonZeroUsize = match NonZeroUsize::new(4) {
        Some(size) => size,
        None => unreachable!(),
    };

    pub fn new(url: impl Into<String>, pool_size: NonZeroUsize) -> Self {
        Self {
            pool: ChannelPool::new(url, pool_size),
        }
    }

    /// アイドル接続を閉じ、以降の投入を拒否する
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QueuePublisher for AmqpPublisher {
    #[tracing::instrument(skip_all, fields(queue = %queue, recipient = %message.to()))]
    async fn publish(&self, queue: &QueueName, message: &EmailMessage) -> Result<(), InfraError> {
        let payload = message.to_envelope()?;

        let mut guard = self.pool.checkout().await?;

        if let Err(e) = declare_queue(guard.channel(), queue).await {
            guard.mark_broken();
            return Err(e);
        }

        let properties = BasicProperties::default().with_content_type(JSON_CONTENT_TYPE.into());
        let published = guard
            .channel()
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue.as_str(),
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &payload,
                properties,
            )
            .await;

        if let Err(e) = published {
            guard.mark_broken();
            return Err(InfraError::publish(e));
        }

        tracing::debug!(bytes = payload.len(), "キューに投入しました");
        Ok(())
    }
}
