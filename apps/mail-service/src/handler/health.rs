//! # ヘルスチェックハンドラ
//!
//! ```text
//! GET /health
//! ```
//!
//! ブローカーや SMTP リレーの疎通は確認しない。プロセスが HTTP を
//! 受け付けていることだけを示す。

use axum::Json;
use postbox_shared::HealthResponse;

/// ヘルスチェックエンドポイント
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(env!("CARGO_PKG_VERSION")))
}
