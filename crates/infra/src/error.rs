//! # インフラ層エラー定義
//!
//! ブローカーやメールリレーとの通信で発生するエラーを表現する。
//!
//! ## 構造
//!
//! `std::io::Error` と同じ struct + enum パターンを採用:
//! - [`InfraError`]: エラー種別（[`InfraErrorKind`]）と [`SpanTrace`] を保持するラッパー
//! - [`InfraErrorKind`]: エラーの具体的な種別（Connection, Publish 等）
//!
//! キュー投入の各段階（接続・チャネル・キュー宣言・シリアライズ・publish）は
//! 別々の種別として区別し、呼び出し側がどこで失敗したかを判別できるようにする。
//! いずれもインフラ層では再試行しない。

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// 下位ライブラリのエラーを型消去して保持するための別名
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// インフラ層で発生するエラー
///
/// エラー種別（[`InfraErrorKind`]）と [`SpanTrace`]（呼び出し経路）を保持する。
/// convenience constructor でエラーを生成すると、その時点のスパン情報が
/// 自動的にキャプチャされる。
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// ブローカーへの接続に失敗
    #[error("ブローカー接続エラー: {0}")]
    Connection(#[source] BoxError),

    /// チャネルのオープンに失敗
    #[error("チャネルエラー: {0}")]
    Channel(#[source] BoxError),

    /// キュー宣言に失敗（既存キューとのパラメータ不一致を含む）
    #[error("キュー宣言エラー: {0}")]
    QueueDeclare(#[source] BoxError),

    /// メッセージの publish に失敗
    #[error("publish エラー: {0}")]
    Publish(#[source] BoxError),

    /// コンシューマ登録またはメッセージ受信に失敗
    #[error("consume エラー: {0}")]
    Consume(#[source] BoxError),

    /// JSON エンベロープのシリアライズ/デシリアライズに失敗
    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// 起動時のブローカー待機が上限回数に達した
    #[error("ブローカーに接続できません（{attempts} 回試行）")]
    BrokerUnavailable {
        /// 失敗した試行回数
        attempts: u32,
    },

    /// メール送信トランスポートの構築に失敗
    #[error("メールトランスポート構築エラー: {0}")]
    MailTransport(String),
}

impl InfraError {
    /// エラー種別を取得する
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    /// SpanTrace を取得する
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    fn capture(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }

    // ===== Convenience constructors =====

    pub fn connection(source: impl Into<BoxError>) -> Self {
        Self::capture(InfraErrorKind::Connection(source.into()))
    }

    pub fn channel(source: impl Into<BoxError>) -> Self {
        Self::capture(InfraErrorKind::Channel(source.into()))
    }

    pub fn queue_declare(source: impl Into<BoxError>) -> Self {
        Self::capture(InfraErrorKind::QueueDeclare(source.into()))
    }

    pub fn publish(source: impl Into<BoxError>) -> Self {
        Self::capture(InfraErrorKind::Publish(source.into()))
    }

    pub fn consume(source: impl Into<BoxError>) -> Self {
        Self::capture(InfraErrorKind::Consume(source.into()))
    }

    pub fn broker_unavailable(attempts: u32) -> Self {
        Self::capture(InfraErrorKind::BrokerUnavailable { attempts })
    }

    pub fn mail_transport(msg: impl Into<String>) -> Self {
        Self::capture(InfraErrorKind::MailTransport(msg.into()))
    }
}

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self::capture(InfraErrorKind::Serialization(source))
    }
}
