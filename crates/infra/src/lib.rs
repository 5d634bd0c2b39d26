//! # Postbox インフラ層
//!
//! メッセージブローカーと SMTP リレーとの通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **キュー投入**: 送信依頼を JSON エンベロープにして送信依頼キューへ publish
//! - **キュー消費**: キューを購読し、1 件ずつメール配送に渡す
//! - **ブローカー待機**: 起動時にブローカーへ接続できるまで再試行
//! - **メール配送**: ローカルキャプチャ SMTP / TLS リレー / Noop
//!
//! ## 依存関係
//!
//! ```text
//! mail-service → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`broker`] - AMQP（lapin）とインメモリのブローカー実装
//! - [`mail`] - メール配送
//! - [`error`] - インフラ層エラー定義
//! - `mock` - テスト用モック（`test-utils` feature）
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use postbox_domain::{EmailMessage, QueueName};
//! use postbox_infra::broker::{AmqpPublisher, QueuePublisher};
//!
//! async fn enqueue() -> Result<(), Box<dyn std::error::Error>> {
//!     let publisher = AmqpPublisher::new("amqp://localhost:5672/%2f", AmqpPublisher::DEFAULT_POOL_SIZE);
//!     let message = EmailMessage::new("a@b.com", "hi", "<p>hi</p>")?;
//!     publisher.publish(&QueueName::default(), &message).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod error;
pub mod mail;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{BoxError, InfraError, InfraErrorKind};
