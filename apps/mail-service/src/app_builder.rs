//! # アプリケーション構築
//!
//! State の初期化とルーター構築を担当する。
//! `main.rs` はインフラ初期化とサーバー起動に集中する。

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use postbox_infra::broker::QueuePublisher;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    handler::{MailState, health_check, send_bulk, send_code, send_email},
    usecase::EnqueueUseCase,
};

/// 設定と投入先から共有状態を組み立てる
pub fn build_state(config: &AppConfig, publisher: Arc<dyn QueuePublisher>) -> Arc<MailState> {
    Arc::new(MailState {
        usecase:             EnqueueUseCase::new(publisher, config.broker.queue.clone()),
        bulk_failure_policy: config.bulk_failure_policy,
    })
}

/// ルーターを構築する
pub fn build_router(state: Arc<MailState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/send", post(send_email))
        .route("/send-code", post(send_code))
        .route("/send-bulk", post(send_bulk))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
