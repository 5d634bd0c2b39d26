//! # テスト用モック配送
//!
//! コンシューマのテストで使用するインメモリのメール配送実装。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! postbox-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use postbox_domain::{DeliveryError, EmailMessage};

use crate::mail::MailDispatcher;

// ===== MockMailDispatcher =====

/// 配送を記録するモック
///
/// 試行回数は成功・失敗を問わず数える。失敗させたい場合は
/// [`fail_all`](Self::fail_all) または [`fail_recipient`](Self::fail_recipient) を使う。
#[derive(Clone, Default)]
pub struct MockMailDispatcher {
    delivered:         Arc<Mutex<Vec<EmailMessage>>>,
    attempts:          Arc<Mutex<usize>>,
    fail_all:          Arc<Mutex<bool>>,
    failing_addresses: Arc<Mutex<HashSet<String>>>,
}

impl MockMailDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降のすべての配送を失敗させる
    pub fn fail_all(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    /// 指定した宛先への配送を失敗させる
    pub fn fail_recipient(&self, recipient: impl Into<String>) {
        self.failing_addresses
            .lock()
            .unwrap()
            .insert(recipient.into());
    }

    /// 配送に成功したメッセージ（配送順）
    pub fn delivered(&self) -> Vec<EmailMessage> {
        self.delivered.lock().unwrap().clone()
    }

    /// 配送の試行回数
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl MailDispatcher for MockMailDispatcher {
    async fn deliver(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        *self.attempts.lock().unwrap() += 1;

        let should_fail = *self.fail_all.lock().unwrap()
            || self.failing_addresses.lock().unwrap().contains(message.to());
        if should_fail {
            return Err(DeliveryError::SendFailed(format!(
                "リレーが拒否しました: {}",
                message.to()
            )));
        }

        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}
