//! # Mail Service ライブラリ
//!
//! 送信依頼の取り込み API と、キュー消費側の組み立てを公開する。
//! 統合テストからルーターを直接構築できるようにする。

pub mod app_builder;
pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;
