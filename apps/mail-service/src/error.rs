//! # Mail Service エラー定義
//!
//! 取り込み API で発生するエラーと、HTTP レスポンスへの変換を定義する。
//! レスポンス本体は RFC 9457 Problem Details（[`ErrorResponse`]）。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use postbox_domain::DomainError;
use postbox_infra::InfraError;
use postbox_shared::ErrorResponse;
use thiserror::Error;

/// 取り込み API で発生するエラー
#[derive(Debug, Error)]
pub enum ApiError {
    /// リクエスト本体を JSON として解釈できない、またはスキーマ不一致
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),

    /// 宛先や認証コードの検証失敗
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// キューへの投入に失敗
    #[error("キュー投入エラー: {0}")]
    Publish(#[from] InfraError),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON の解析に失敗しました: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::BadRequest(detail) => ErrorResponse::bad_request(detail.clone()),
            ApiError::Validation(DomainError::Validation(detail)) => {
                ErrorResponse::validation_error(detail.clone())
            }
            ApiError::Publish(e) => {
                tracing::error!(
                    error.category = "infrastructure",
                    error.kind = "publish",
                    error = %e,
                    span_trace = %e.span_trace(),
                    "キューへの投入に失敗しました"
                );
                ErrorResponse::internal_error()
            }
        };

        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_不正なjsonは400() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        let response = ApiError::from(json_err).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_バリデーションエラーは400() {
        let err: ApiError = DomainError::Validation("宛先が不正です".to_string()).into();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_投入エラーは500() {
        let err: ApiError = InfraError::publish("connection reset").into();

        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
