//! SMTP 配送実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境では Mailpit（ローカル SMTP サーバー）に、本番では認証付きの
//! TLS リレーに接続する。

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{Mailbox, Message, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use postbox_domain::{DeliveryError, EmailMessage};

use super::{MailDispatcher, SmtpSettings};
use crate::InfraError;

/// 暗黙の TLS（SMTPS）で待ち受けるポート
const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP 配送
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
pub struct SmtpMailDispatcher {
    transport:    AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailDispatcher {
    /// ローカルキャプチャリレー向け（認証・暗号化なし）
    pub fn local(settings: &SmtpSettings) -> Self {
        // builder_dangerous: TLS なしで接続（Mailpit 等のローカル SMTP 向け）
        let transport =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
                .port(settings.port)
                .build();

        Self {
            transport,
            from_address: settings.sender_address().to_string(),
        }
    }

    /// 認証付き TLS リレー向け
    ///
    /// サーバー証明書は `settings.host` に対して検証する。ポート 465 は暗黙の TLS、
    /// それ以外は STARTTLS を必須として接続する。
    pub fn relay(settings: &SmtpSettings) -> Result<Self, InfraError> {
        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| InfraError::mail_transport(format!("TLS 設定失敗: {e}")))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from_address: settings.sender_address().to_string(),
        })
    }

    fn build_message(&self, email: &EmailMessage) -> Result<Message, DeliveryError> {
        let from: Mailbox = self
            .from_address
            .parse()
            .map_err(|e| DeliveryError::SendFailed(format!("送信元アドレス不正: {e}")))?;
        let to: Mailbox = email
            .to()
            .parse()
            .map_err(|e| DeliveryError::SendFailed(format!("宛先アドレス不正: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject())
            .header(ContentType::TEXT_HTML)
            .body(email.body().to_string())
            .map_err(|e| DeliveryError::SendFailed(format!("メッセージ構築失敗: {e}")))
    }
}

#[async_trait]
impl MailDispatcher for SmtpMailDispatcher {
    #[tracing::instrument(skip_all, fields(recipient = %email.to()))]
    async fn deliver(&self, email: &EmailMessage) -> Result<(), DeliveryError> {
        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("SMTP 送信失敗: {e}")))?;

        tracing::info!("メールを送信しました");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_settings() -> SmtpSettings {
        SmtpSettings {
            host:         "localhost".to_string(),
            port:         1025,
            username:     String::new(),
            password:     String::new(),
            from_address: None,
        }
    }

    #[test]
    fn test_トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmtpMailDispatcher>();
    }

    #[tokio::test]
    async fn test_html本文のメッセージを組み立てる() {
        let dispatcher = SmtpMailDispatcher::local(&local_settings());
        let email = EmailMessage::new("user@example.com", "件名", "<p>本文</p>").unwrap();

        let message = dispatcher.build_message(&email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("From: no-reply@postbox.local"));
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Content-Type: text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_宛先が解釈できなければsend_failed() {
        let dispatcher = SmtpMailDispatcher::local(&local_settings());
        // ドメイン層の検証は通るが RFC 5322 のメールボックスとしては不正
        let email = EmailMessage::new("a@b@c", "件名", "本文").unwrap();

        let result = dispatcher.deliver(&email).await;

        assert!(matches!(result, Err(DeliveryError::SendFailed(reason)) if reason.contains("宛先")));
    }

    #[tokio::test]
    async fn test_接続できなければsend_failed() {
        let mut settings = local_settings();
        // 予約ポートで待ち受けはない
        settings.port = 1;
        let dispatcher = SmtpMailDispatcher::local(&settings);
        let email = EmailMessage::new("user@example.com", "件名", "本文").unwrap();

        let result = dispatcher.deliver(&email).await;

        assert!(matches!(result, Err(DeliveryError::SendFailed(_))));
    }
}
