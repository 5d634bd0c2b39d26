//! # 送信依頼ハンドラ
//!
//! ## エンドポイント
//!
//! - `POST /send` - 1 通の送信依頼
//! - `POST /send-code` - 認証コードメールの送信依頼（コード未指定なら生成）
//! - `POST /send-bulk` - 同じ件名・本文で複数宛先へ送信依頼
//!
//! リクエスト本体は生のバイト列から serde_json で解釈する。不正な JSON や
//! スキーマ不一致は Content-Type に関わらずすべて 400 になる。

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use postbox_domain::{
    EmailMessage,
    bulk::BulkSendRequest,
    verification::VerificationCodeRequest,
};
use postbox_shared::ApiResponse;
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    usecase::{BulkFailurePolicy, EnqueueUseCase},
};

/// 送信依頼 API の共有状態
pub struct MailState {
    pub usecase:             EnqueueUseCase,
    pub bulk_failure_policy: BulkFailurePolicy,
}

// --- リクエスト/レスポンス型 ---

/// 1 通の送信依頼
#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to:      String,
    pub subject: String,
    pub body:    String,
}

/// 受付結果
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedResponse {
    pub status: String,
    pub queued: usize,
}

impl QueuedResponse {
    fn single() -> Self {
        Self {
            status: "queued".to_string(),
            queued: 1,
        }
    }
}

// --- ハンドラ ---

/// POST /send
///
/// ## レスポンス
///
/// - `202 Accepted`: キューに投入した
/// - `400 Bad Request`: JSON 不正、宛先不正
/// - `500 Internal Server Error`: キュー投入失敗
#[tracing::instrument(skip_all)]
pub async fn send_email(
    State(state): State<Arc<MailState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: SendEmailRequest = serde_json::from_slice(&body)?;
    let message = EmailMessage::new(req.to, req.subject, req.body)?;

    state.usecase.send(&message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(QueuedResponse::single())),
    ))
}

/// POST /send-code
///
/// `code` が未指定または空文字列なら 6 桁のコードを生成する。
/// 指定する場合は英数字 1〜32 文字。
#[tracing::instrument(skip_all)]
pub async fn send_code(
    State(state): State<Arc<MailState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: VerificationCodeRequest = serde_json::from_slice(&body)?;

    state.usecase.send_code(req).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(QueuedResponse::single())),
    ))
}

/// POST /send-bulk
///
/// 宛先ごとの結果をレポートで返す。ステータスコードは一斉送信の応答方針に従う。
#[tracing::instrument(skip_all)]
pub async fn send_bulk(
    State(state): State<Arc<MailState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: BulkSendRequest = serde_json::from_slice(&body)?;

    let report = state.usecase.send_bulk(&req).await;
    let status = state.bulk_failure_policy.status_for(&report);

    Ok((status, Json(ApiResponse::new(report))))
}
