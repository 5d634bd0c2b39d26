//! # メッセージブローカー
//!
//! 送信依頼キューへの投入・消費と、起動時のブローカー待機を担当する。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: 投入は [`QueuePublisher`]、消費側の 1 件は
//!   [`InboundDelivery`]、起動時の疎通確認は [`BrokerConnector`] で抽象化
//! - **2 つの実装**: AMQP（lapin、本番）と `InMemoryBroker`（テスト用、
//!   `test-utils` feature で公開）
//! - **キュー宣言の一致**: 投入側と消費側は [`declare_queue`] で同じパラメータを
//!   使う。不一致だとブローカーが `PRECONDITION_FAILED` で拒否する
//!
//! ```text
//! publisher ──▶ default exchange ("") ──routing key = queue──▶ [send-email] ──▶ consumer
//! ```

mod consumer;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod pool;
mod publisher;
mod readiness;

use lapin::{options::QueueDeclareOptions, types::FieldTable};
use postbox_domain::QueueName;

pub use consumer::{
    AckMode,
    AmqpDelivery,
    AmqpSubscription,
    ConsumerStats,
    DeliveryOutcome,
    InboundDelivery,
    QueueConsumer,
};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{InMemoryBroker, MemoryDelivery};
pub use pool::{ChannelGuard, ChannelPool};
pub use publisher::{AmqpPublisher, QueuePublisher};
pub use readiness::{AmqpConnector, BrokerConnector, ProbePolicy, wait_for_broker};

use crate::InfraError;

/// publish 時の content-type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// 既定 exchange（routing key = キュー名で直接キューに届く）
pub const DEFAULT_EXCHANGE: &str = "";

/// キュー宣言オプション
///
/// durable / 非 exclusive / 非 auto-delete。同じパラメータでの再宣言は何もしない。
pub fn queue_declare_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        exclusive: false,
        auto_delete: false,
        ..QueueDeclareOptions::default()
    }
}

/// 送信依頼キューを宣言する（冪等）
pub async fn declare_queue(channel: &lapin::Channel, queue: &QueueName) -> Result<(), InfraError> {
    channel
        .queue_declare(queue.as_str(), queue_declare_options(), FieldTable::default())
        .await
        .map_err(InfraError::queue_declare)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_キュー宣言オプションはdurableかつ非exclusiveかつ非auto_delete() {
        let options = queue_declare_options();

        assert!(options.durable);
        assert!(!options.exclusive);
        assert!(!options.auto_delete);
        assert!(!options.passive);
        assert!(!options.nowait);
    }
}
