//! # ユースケース層
//!
//! 送信依頼の組み立て・検証・キュー投入を実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: 投入先を `Arc<dyn QueuePublisher>` で外部から注入
//! - **薄いハンドラ**: ハンドラは JSON の解釈のみ行い、ロジックはここに集約
//! - **一斉送信の独立性**: 1 宛先の失敗（形式不正・投入失敗）は他の宛先を止めない

use std::sync::Arc;

use axum::http::StatusCode;
use postbox_domain::{
    EmailMessage,
    QueueName,
    bulk::{BulkSendReport, BulkSendRequest},
    verification::VerificationCodeRequest,
};
use postbox_infra::broker::QueuePublisher;
use strum::{Display, EnumString};

use crate::error::ApiError;

/// 一斉送信で一部が失敗したときの応答方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BulkFailurePolicy {
    /// 常に 202、失敗した宛先はレポートで返す
    #[default]
    BestEffort,
    /// 全件成功 202 / 一部失敗 207 / 全件失敗 500
    Strict,
}

impl BulkFailurePolicy {
    /// 集計結果に対応するステータスコード
    pub fn status_for(self, report: &BulkSendReport) -> StatusCode {
        match self {
            Self::BestEffort => StatusCode::ACCEPTED,
            Self::Strict if report.is_complete_success() => StatusCode::ACCEPTED,
            Self::Strict if report.is_total_failure() => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Strict => StatusCode::MULTI_STATUS,
        }
    }
}

/// 送信依頼のキュー投入ユースケース
pub struct EnqueueUseCase {
    publisher: Arc<dyn QueuePublisher>,
    queue:     QueueName,
}

impl EnqueueUseCase {
    pub fn new(publisher: Arc<dyn QueuePublisher>, queue: QueueName) -> Self {
        Self { publisher, queue }
    }

    /// 1 通を投入する
    pub async fn send(&self, message: &EmailMessage) -> Result<(), ApiError> {
        self.publisher.publish(&self.queue, message).await?;
        tracing::info!(recipient = %message.to(), queue = %self.queue, "送信依頼を受け付けました");
        Ok(())
    }

    /// 認証コードメールを組み立てて投入する
    pub async fn send_code(&self, request: VerificationCodeRequest) -> Result<(), ApiError> {
        let message = request.into_email()?;
        self.send(&message).await
    }

    /// 宛先ごとに展開して投入する
    ///
    /// 宛先の順に 1 件ずつ投入し、結果をレポートに集計する。
    pub async fn send_bulk(&self, request: &BulkSendRequest) -> BulkSendReport {
        let mut report = BulkSendReport::default();

        for (recipient, message) in request.expand() {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(recipient, error = %e, "宛先が不正なためスキップします");
                    report.record_failure(recipient, e.to_string());
                    continue;
                }
            };

            match self.publisher.publish(&self.queue, &message).await {
                Ok(()) => report.record_queued(),
                Err(e) => {
                    tracing::error!(recipient, error = %e, "一斉送信の投入に失敗しました");
                    report.record_failure(recipient, "キューへの投入に失敗しました");
                }
            }
        }

        tracing::info!(
            queued = report.queued,
            failed = report.failed.len(),
            "一斉送信を受け付けました"
        );
        report
    }
}
