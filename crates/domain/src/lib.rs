//! # Postbox ドメイン層
//!
//! 送信依頼の作業単位とその組み立てルールを定義する。
//!
//! ## 依存関係の方向
//!
//! ```text
//! mail-service → infra → domain
//! ```
//!
//! ドメイン層はブローカーや SMTP といったインフラには一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`email`] - メールメッセージ、宛先アドレス、ワイヤ形式、配送エラー
//! - [`verification`] - 認証コードの生成と認証コードメールの組み立て
//! - [`bulk`] - 一斉送信リクエストの展開と結果集計
//! - [`queue`] - キュー名
//! - [`error`] - ドメイン層エラー

pub mod bulk;
pub mod email;
pub mod error;
pub mod queue;
pub mod verification;

pub use email::{DeliveryError, EmailAddress, EmailMessage};
pub use error::DomainError;
pub use queue::{QueueName, SEND_EMAIL_QUEUE};
