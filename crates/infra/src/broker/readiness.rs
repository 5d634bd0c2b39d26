//! ブローカー待機
//!
//! 起動時にブローカーへ接続できるまで呼び出し元をブロックする。
//! ブローカーがなければこのサービスにできる仕事はないため、既定では
//! 上限なしで一定間隔の再試行を続ける（永久にブロックしうる）。
//! 上限回数は [`ProbePolicy::max_attempts`] でオプトインする。

use std::time::Duration;

use async_trait::async_trait;
use lapin::{Connection, ConnectionProperties};

use crate::InfraError;

/// 疎通確認のための接続を行う
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// 接続を確立し、購読は行わずにすぐ閉じる
    async fn probe(&self) -> Result<(), InfraError>;
}

/// AMQP ブローカーへの疎通確認
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn probe(&self) -> Result<(), InfraError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(InfraError::connection)?;

        if let Err(e) = connection.close(200, "probe").await {
            // 接続自体は成立しているので待機は終了してよい
            tracing::debug!(error = %e, "疎通確認用接続のクローズに失敗");
        }
        Ok(())
    }
}

/// 再試行ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// 失敗後に次の試行まで待つ固定間隔
    pub interval:     Duration,
    /// 失敗回数の上限（`None` で無制限）
    pub max_attempts: Option<u32>,
}

impl ProbePolicy {
    /// 既定の待機間隔（5 秒）
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval:     Self::DEFAULT_INTERVAL,
            max_attempts: None,
        }
    }
}

/// ブローカーに接続できるまで待機する
///
/// 成功までに失敗した試行回数を返す。失敗のたびに警告ログを 1 行出力する。
/// `max_attempts` に達した場合は `BrokerUnavailable` を返す。
#[tracing::instrument(skip_all, fields(interval_secs = policy.interval.as_secs()))]
pub async fn wait_for_broker(
    connector: &dyn BrokerConnector,
    policy: &ProbePolicy,
) -> Result<u32, InfraError> {
    let mut failed: u32 = 0;

    loop {
        match connector.probe().await {
            Ok(()) => {
                tracing::info!(failed_attempts = failed, "ブローカーに接続できました");
                return Ok(failed);
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    attempt = failed,
                    error = %e,
                    "ブローカーに接続できません。{} 秒後に再試行します",
                    policy.interval.as_secs()
                );

                if policy.max_attempts.is_some_and(|max| failed >= max) {
                    return Err(InfraError::broker_unavailable(failed));
                }
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}
