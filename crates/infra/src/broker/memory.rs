//! インメモリブローカー
//!
//! ネットワークを使わずに投入・消費の経路を検証するためのブローカー実装。
//! キューごとに待機中メッセージの FIFO と未 ack 件数を持つ。
//!
//! - ワイヤ形式は AMQP 実装と同じ JSON エンベロープ
//! - [`AckMode::Auto`] では取り出した時点で ack 済みとして扱う
//! - [`close`](InMemoryBroker::close) 後、購読ストリームは待機中メッセージを
//!   出し切ってから終了する

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures::Stream;
use postbox_domain::{EmailMessage, QueueName};
use tokio::sync::Notify;

use super::{AckMode, InboundDelivery, QueuePublisher};
use crate::InfraError;

#[derive(Default)]
struct QueueState {
    ready:   VecDeque<Vec<u8>>,
    unacked: usize,
}

#[derive(Default)]
struct BrokerState {
    queues:              HashMap<String, QueueState>,
    rejected_recipients: HashSet<String>,
    closed:              bool,
}

#[derive(Default)]
struct Inner {
    state:  Mutex<BrokerState>,
    notify: Notify,
}

/// インメモリブローカー
///
/// `Clone` は同じブローカーを共有するハンドルを返す。
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// エンベロープを介さず生のバイト列を投入する
    pub fn publish_raw(&self, queue: &QueueName, payload: impl Into<Vec<u8>>) {
        self.state()
            .queues
            .entry(queue.as_str().to_string())
            .or_default()
            .ready
            .push_back(payload.into());
        self.inner.notify.notify_waiters();
    }

    /// 指定した宛先への投入を publish エラーにする
    pub fn reject_recipient(&self, recipient: impl Into<String>) {
        self.state().rejected_recipients.insert(recipient.into());
    }

    /// 配送待ちのメッセージ数
    pub fn depth(&self, queue: &QueueName) -> usize {
        self.state()
            .queues
            .get(queue.as_str())
            .map_or(0, |q| q.ready.len())
    }

    /// 取り出し済みで ack / reject されていないメッセージ数
    pub fn unacked(&self, queue: &QueueName) -> usize {
        self.state()
            .queues
            .get(queue.as_str())
            .map_or(0, |q| q.unacked)
    }

    /// 配送待ちのメッセージ（復元できないものは除く）
    pub fn messages(&self, queue: &QueueName) -> Vec<EmailMessage> {
        self.state()
            .queues
            .get(queue.as_str())
            .map(|q| {
                q.ready
                    .iter()
                    .filter_map(|payload| EmailMessage::from_envelope(payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 購読中のストリームを終了させる
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// キューを購読する
    pub fn subscribe(
        &self,
        queue: &QueueName,
        mode: AckMode,
    ) -> impl Stream<Item = Result<MemoryDelivery, InfraError>> + Send + 'static {
        let initial = (self.clone(), queue.as_str().to_string());

        futures::stream::unfold(initial, move |(broker, queue)| async move {
            let inner = Arc::clone(&broker.inner);
            loop {
                let notified = inner.notify.notified();
                tokio::pin!(notified);
                // 状態確認より前に登録し、その間の通知を取りこぼさない
                notified.as_mut().enable();

                {
                    let mut state = broker.state();
                    let closed = state.closed;
                    let entry = state.queues.entry(queue.clone()).or_default();

                    if let Some(payload) = entry.ready.pop_front() {
                        if mode == AckMode::AfterDispatch {
                            entry.unacked += 1;
                        }
                        drop(state);

                        let delivery = MemoryDelivery {
                            broker: broker.clone(),
                            queue: queue.clone(),
                            payload,
                            mode,
                        };
                        return Some((Ok(delivery), (broker, queue)));
                    }

                    if closed {
                        return None;
                    }
                }

                notified.await;
            }
        })
    }

    fn settle(&self, queue: &str, requeue: Option<Vec<u8>>) {
        let mut state = self.state();
        let entry = state.queues.entry(queue.to_string()).or_default();
        entry.unacked = entry.unacked.saturating_sub(1);

        if let Some(payload) = requeue {
            entry.ready.push_front(payload);
            drop(state);
            self.inner.notify.notify_waiters();
        }
    }
}

/// キューの中身は出さず、キューごとの件数だけを出力する
impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        let depths: HashMap<&str, usize> = state
            .queues
            .iter()
            .map(|(name, q)| (name.as_str(), q.ready.len()))
            .collect();

        f.debug_struct("InMemoryBroker")
            .field("depths", &depths)
            .field("closed", &state.closed)
            .finish()
    }
}

#[async_trait]
impl QueuePublisher for InMemoryBroker {
    async fn publish(&self, queue: &QueueName, message: &EmailMessage) -> Result<(), InfraError> {
        if self.state().rejected_recipients.contains(message.to()) {
            return Err(InfraError::publish(format!(
                "ブローカーが拒否しました: {}",
                message.to()
            )));
        }

        let payload = message.to_envelope()?;
        self.publish_raw(queue, payload);
        Ok(())
    }
}

/// インメモリブローカーから取り出した 1 件
#[derive(Debug)]
pub struct MemoryDelivery {
    broker:  InMemoryBroker,
    queue:   String,
    payload: Vec<u8>,
    mode:    AckMode,
}

#[async_trait]
impl InboundDelivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<(), InfraError> {
        if self.mode == AckMode::AfterDispatch {
            self.broker.settle(&self.queue, None);
        }
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), InfraError> {
        if self.mode == AckMode::AfterDispatch {
            let requeued = requeue.then(|| self.payload.clone());
            self.broker.settle(&self.queue, requeued);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage::new(to, "hi", "<p>hi</p>").unwrap()
    }

    #[tokio::test]
    async fn test_投入したメッセージが順番に取り出せる() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.publish(&queue, &message("a@b.com")).await.unwrap();
        broker.publish(&queue, &message("c@d.com")).await.unwrap();
        broker.close();

        let payloads: Vec<_> = broker
            .subscribe(&queue, AckMode::Auto)
            .map(|d| EmailMessage::from_envelope(d.unwrap().payload()).unwrap())
            .collect()
            .await;

        assert_eq!(payloads, vec![message("a@b.com"), message("c@d.com")]);
        assert_eq!(broker.depth(&queue), 0);
    }

    #[tokio::test]
    async fn test_購読後に投入されたメッセージも届く() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::Auto));

        let publisher = broker.clone();
        let q = queue.clone();
        tokio::spawn(async move {
            publisher.publish(&q, &message("late@example.com")).await.unwrap();
        });

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(
            EmailMessage::from_envelope(delivery.payload()).unwrap().to(),
            "late@example.com"
        );
    }

    #[tokio::test]
    async fn test_空のキューでは投入まで受信を待つ() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::Auto));
        let mut next = tokio_test::task::spawn(stream.next());

        tokio_test::assert_pending!(next.poll());

        broker.publish(&queue, &message("a@b.com")).await.unwrap();

        assert!(next.is_woken());
        let delivery = tokio_test::assert_ready!(next.poll());
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn test_拒否宛先への投入はpublishエラー() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.reject_recipient("ng@example.com");

        let err = broker.publish(&queue, &message("ng@example.com")).await.unwrap_err();

        assert!(matches!(err.kind(), crate::InfraErrorKind::Publish(_)));
        assert_eq!(broker.depth(&queue), 0);
    }

    #[tokio::test]
    async fn test_手動ackモードでは取り出し後ackまで未ackとして数える() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.publish(&queue, &message("a@b.com")).await.unwrap();
        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::AfterDispatch));

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(broker.unacked(&queue), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.unacked(&queue), 0);
        assert_eq!(broker.depth(&queue), 0);
    }

    #[tokio::test]
    async fn test_requeue付きrejectはキュー先頭に戻す() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.publish(&queue, &message("first@example.com")).await.unwrap();
        broker.publish(&queue, &message("second@example.com")).await.unwrap();
        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::AfterDispatch));

        let delivery = stream.next().await.unwrap().unwrap();
        delivery.reject(true).await.unwrap();

        let messages = broker.messages(&queue);
        assert_eq!(messages[0].to(), "first@example.com");
        assert_eq!(messages.len(), 2);
        assert_eq!(broker.unacked(&queue), 0);
    }

    #[tokio::test]
    async fn test_requeueなしrejectは破棄する() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.publish_raw(&queue, b"broken".to_vec());
        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::AfterDispatch));

        let delivery = stream.next().await.unwrap().unwrap();
        delivery.reject(false).await.unwrap();

        assert_eq!(broker.depth(&queue), 0);
        assert_eq!(broker.unacked(&queue), 0);
    }

    #[tokio::test]
    async fn test_debug出力は件数だけでメッセージ本文を含まない() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::default();
        broker.publish(&queue, &message("secret@example.com")).await.unwrap();

        let debug = format!("{broker:?}");

        assert!(debug.contains("send-email"), "{debug}");
        assert!(!debug.contains("secret@example.com"), "{debug}");

        let mut stream = Box::pin(broker.subscribe(&queue, AckMode::Auto));
        let delivery = stream.next().await;
        assert!(format!("{delivery:?}").contains("MemoryDelivery"));
    }

    #[tokio::test]
    async fn test_キューは名前ごとに独立している() {
        let broker = InMemoryBroker::new();
        let other = QueueName::new("other").unwrap();
        broker.publish(&other, &message("a@b.com")).await.unwrap();

        assert_eq!(broker.depth(&QueueName::default()), 0);
        assert_eq!(broker.depth(&other), 1);
    }
}
