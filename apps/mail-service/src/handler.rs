//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、組み立てと投入はユースケースに委譲

pub mod email;
pub mod health;

pub use email::{MailState, send_bulk, send_code, send_email};
pub use health::health_check;
