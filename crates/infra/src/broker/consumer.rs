//! キュー消費
//!
//! 送信依頼キューを購読し、1 件ごとにエンベロープを復元してメール配送に渡す。
//! 再試行・バックオフ・デッドレターはない。
//!
//! ## ack モード
//!
//! | モード | ack | 配送失敗時 | 復元失敗時 | 保証 |
//! |--------|-----|------------|------------|------|
//! | `auto` | ブローカー側で自動 | 消失 | 消失 | at-most-once |
//! | `after_dispatch` | 配送成功後 | requeue 付き reject | requeue なし reject | at-least-once |

use std::{pin::pin, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    Channel,
    Connection,
    ConnectionProperties,
    Consumer,
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions},
    types::FieldTable,
};
use postbox_domain::{EmailMessage, QueueName};
use strum::{Display, EnumString};

use super::declare_queue;
use crate::{InfraError, mail::MailDispatcher};

/// コンシューマタグ
const CONSUMER_TAG: &str = "postbox-mail-service";

/// `after_dispatch` モードでの未 ack 上限
const MANUAL_ACK_PREFETCH: u16 = 16;

/// ack モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AckMode {
    /// 受信と同時に ack 済み（at-most-once）
    #[default]
    Auto,
    /// 配送成功後に ack（at-least-once）
    AfterDispatch,
}

/// キューから受け取った 1 件
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    /// メッセージ本体
    fn payload(&self) -> &[u8];

    async fn ack(&self) -> Result<(), InfraError>;

    async fn reject(&self, requeue: bool) -> Result<(), InfraError>;
}

/// AMQP で受け取った 1 件
pub struct AmqpDelivery(Delivery);

#[async_trait]
impl InboundDelivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(&self) -> Result<(), InfraError> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(InfraError::consume)
    }

    async fn reject(&self, requeue: bool) -> Result<(), InfraError> {
        self.0
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(InfraError::consume)
    }
}

/// AMQP の購読
///
/// 長寿命の接続とチャネルを 1 本ずつ持つ。キューは投入側と同じパラメータで宣言する。
pub struct AmqpSubscription {
    connection: Connection,
    channel:    Channel,
    consumer:   Consumer,
}

impl AmqpSubscription {
    #[tracing::instrument(skip(url, queue), fields(queue = %queue))]
    pub async fn subscribe(url: &str, queue: &QueueName, mode: AckMode) -> Result<Self, InfraError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(InfraError::connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(InfraError::channel)?;

        declare_queue(&channel, queue).await?;

        if mode == AckMode::AfterDispatch {
            channel
                .basic_qos(MANUAL_ACK_PREFETCH, BasicQosOptions::default())
                .await
                .map_err(InfraError::channel)?;
        }

        let consumer = channel
            .basic_consume(
                queue.as_str(),
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: mode == AckMode::Auto,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(InfraError::consume)?;

        tracing::info!(ack_mode = %mode, "キューの購読を開始しました");
        Ok(Self {
            connection,
            channel,
            consumer,
        })
    }

    /// 受信ストリーム
    pub fn deliveries(&self) -> impl Stream<Item = Result<AmqpDelivery, InfraError>> + Send + 'static {
        self.consumer
            .clone()
            .map(|result| result.map(AmqpDelivery).map_err(InfraError::consume))
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::debug!(error = %e, "購読チャネルのクローズに失敗");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::debug!(error = %e, "購読接続のクローズに失敗");
        }
    }
}

/// 1 件の処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 配送に成功
    Delivered,
    /// エンベロープを復元できず破棄
    Discarded,
    /// 配送に失敗
    Failed,
}

/// 消費ループの集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub delivered: u64,
    pub discarded: u64,
    pub failed:    u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Discarded => self.discarded += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.delivered + self.discarded + self.failed
    }
}

/// キューコンシューマ
pub struct QueueConsumer {
    dispatcher: Arc<dyn MailDispatcher>,
    ack_mode:   AckMode,
}

impl QueueConsumer {
    pub fn new(dispatcher: Arc<dyn MailDispatcher>, ack_mode: AckMode) -> Self {
        Self {
            dispatcher,
            ack_mode,
        }
    }

    /// 1 件を処理する
    pub async fn handle<D>(&self, delivery: &D) -> DeliveryOutcome
    where
        D: InboundDelivery + ?Sized,
    {
        let message = match EmailMessage::from_envelope(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bytes = delivery.payload().len(),
                    "エンベロープを復元できないため破棄します"
                );
                self.settle(delivery, Some(false)).await;
                return DeliveryOutcome::Discarded;
            }
        };

        match self.dispatcher.deliver(&message).await {
            Ok(()) => {
                tracing::info!(recipient = %message.to(), "メールを配送しました");
                self.settle(delivery, None).await;
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                tracing::error!(
                    recipient = %message.to(),
                    error = %e,
                    ack_mode = %self.ack_mode,
                    "メールの配送に失敗しました"
                );
                self.settle(delivery, Some(true)).await;
                DeliveryOutcome::Failed
            }
        }
    }

    /// ストリームが終わるかシャットダウンが要求されるまで消費する
    ///
    /// 処理中の 1 件は最後まで処理してから終了する。受信エラーはそのまま返す。
    pub async fn run<S, D, F>(&self, deliveries: S, shutdown: F) -> Result<ConsumerStats, InfraError>
    where
        S: Stream<Item = Result<D, InfraError>>,
        D: InboundDelivery,
        F: Future<Output = ()>,
    {
        let mut deliveries = pin!(deliveries);
        let mut shutdown = pin!(shutdown);
        let mut stats = ConsumerStats::default();

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!(processed = stats.total(), "シャットダウン要求により消費を終了します");
                    return Ok(stats);
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => stats.record(self.handle(&delivery).await),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "メッセージの受信に失敗しました");
                    return Err(e);
                }
                None => {
                    tracing::info!(processed = stats.total(), "受信ストリームが終了しました");
                    return Ok(stats);
                }
            }
        }
    }

    /// `after_dispatch` モードでのみ ack / reject を送る
    ///
    /// `reject` が `None` なら ack、`Some(requeue)` なら reject。
    async fn settle<D>(&self, delivery: &D, reject: Option<bool>)
    where
        D: InboundDelivery + ?Sized,
    {
        if self.ack_mode == AckMode::Auto {
            return;
        }

        let result = match reject {
            None => delivery.ack().await,
            Some(requeue) => delivery.reject(requeue).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "ack / reject の送信に失敗しました");
        }
    }
}
