//! Noop 配送実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! テスト環境や配送無効化時に使用する。

use async_trait::async_trait;
use postbox_domain::{DeliveryError, EmailMessage};

use super::MailDispatcher;

/// Noop 配送（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NoopMailDispatcher;

#[async_trait]
impl MailDispatcher for NoopMailDispatcher {
    async fn deliver(&self, email: &EmailMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            recipient = %email.to(),
            subject = %email.subject(),
            "Noop: メール送信をスキップ"
        );
        Ok(())
    }
}
