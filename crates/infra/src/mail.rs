//! # メール配送
//!
//! キューから取り出したメッセージを SMTP で 1 通ずつ送信する。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`MailDispatcher`] で送信方法を抽象化
//! - **3 つの実装**: ローカルキャプチャ SMTP（Mailpit 等）、TLS リレー、Noop
//! - **環境変数切替**: `MAIL_TRANSPORT` でランタイム選択。`auto` はポート番号で判定する
//!
//! 接続失敗・認証失敗・リレー拒否はすべて [`DeliveryError::SendFailed`] に集約する。

mod noop;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
pub use noop::NoopMailDispatcher;
use postbox_domain::{DeliveryError, EmailMessage};
pub use smtp::SmtpMailDispatcher;
use strum::{Display, EnumString};

use crate::InfraError;

/// ローカルキャプチャリレー（Mailpit / MailHog）の SMTP ポート
pub const LOCAL_CAPTURE_PORT: u16 = 1025;

/// 送信元アドレスの最終フォールバック
pub const FALLBACK_FROM_ADDRESS: &str = "no-reply@postbox.local";

/// メール配送トレイト
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    /// メッセージを 1 通送信する
    async fn deliver(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

/// 送信方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MailTransportKind {
    /// ポート 1025 なら `Local`、それ以外は `Relay`
    #[default]
    Auto,
    /// 認証・暗号化なし（ローカルキャプチャリレー向け）
    Local,
    /// 認証あり、TLS でサーバー証明書をホスト名に対して検証
    Relay,
    /// 送信せずログ出力のみ
    Noop,
}

impl MailTransportKind {
    /// `Auto` をポート番号から具体的な方式に解決する
    pub fn resolve(self, port: u16) -> Self {
        match self {
            Self::Auto if port == LOCAL_CAPTURE_PORT => Self::Local,
            Self::Auto => Self::Relay,
            other => other,
        }
    }
}

/// SMTP 接続設定
#[derive(Clone)]
pub struct SmtpSettings {
    pub host:         String,
    pub port:         u16,
    pub username:     String,
    pub password:     String,
    pub from_address: Option<String>,
}

impl SmtpSettings {
    /// 送信元アドレス
    ///
    /// `from_address`、SMTP ユーザー名、フォールバックの順で最初の空でない値。
    pub fn sender_address(&self) -> &str {
        self.from_address
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.username.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(FALLBACK_FROM_ADDRESS)
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// 送信方式に応じた配送実装を構築する
pub fn build_dispatcher(
    kind: MailTransportKind,
    settings: &SmtpSettings,
) -> Result<Arc<dyn MailDispatcher>, InfraError> {
    let resolved = kind.resolve(settings.port);
    tracing::info!(
        transport = %resolved,
        host = %settings.host,
        port = settings.port,
        "メール送信方式を選択しました"
    );

    let dispatcher: Arc<dyn MailDispatcher> = match resolved {
        MailTransportKind::Local => Arc::new(SmtpMailDispatcher::local(settings)),
        // resolve は Auto を返さない
        MailTransportKind::Relay | MailTransportKind::Auto => {
            Arc::new(SmtpMailDispatcher::relay(settings)?)
        }
        MailTransportKind::Noop => Arc::new(NoopMailDispatcher),
    };
    Ok(dispatcher)
}
