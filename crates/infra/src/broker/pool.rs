//! 投入用コネクションプール
//!
//! 投入のたびに接続とチャネルを張り直すと、一斉送信のような同時投入で
//! メッセージ数と同じだけのブローカー接続が生まれる。プールは同時に
//! 貸し出せる接続数をセマフォで制限し、返却された接続を再利用する。
//!
//! - 貸し出しはスコープ付き（[`ChannelGuard`] のドロップで返却）
//! - 失敗した接続は [`ChannelGuard::mark_broken`] で破棄し、プールに戻さない
//! - 閉じたプールからの貸し出しはチャネルエラーになる

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::InfraError;

/// プール内の 1 接続（接続とその上のチャネル 1 本）
pub struct PooledChannel {
    connection: Connection,
    channel:    Channel,
}

impl PooledChannel {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(self) {
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::debug!(error = %e, "プール接続のクローズに失敗");
        }
    }
}

/// 上限付きの AMQP チャネルプール
pub struct ChannelPool {
    url:     String,
    permits: Semaphore,
    idle:    Mutex<Vec<PooledChannel>>,
}

impl ChannelPool {
    pub fn new(url: impl Into<String>, size: NonZeroUsize) -> Self {
        Self {
            url:     url.into(),
            permits: Semaphore::new(size.get()),
            idle:    Mutex::new(Vec::with_capacity(size.get())),
        }
    }

    /// チャネルを借りる
    ///
    /// 上限に達している場合は返却を待つ。アイドル接続があれば再利用し、
    /// なければ新しく接続してチャネルを開く。
    pub async fn checkout(&self) -> Result<ChannelGuard<'_>, InfraError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InfraError::channel("チャネルプールは閉じられています"))?;

        let slot = match self.take_idle() {
            Some(slot) => slot,
            None => self.open().await?,
        };

        Ok(ChannelGuard {
            pool:    self,
            slot:    Some(slot),
            broken:  false,
            _permit: permit,
        })
    }

    /// 現在アイドル状態の接続数
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 新規の貸し出しを止め、アイドル接続をすべて閉じる
    pub async fn close(&self) {
        self.permits.close();
        let idle = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        for slot in idle {
            slot.close().await;
        }
    }

    fn take_idle(&self) -> Option<PooledChannel> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(slot) = idle.pop() {
            if slot.is_open() {
                return Some(slot);
            }
            tracing::debug!("切断済みのプール接続を破棄");
        }
        None
    }

    async fn open(&self) -> Result<PooledChannel, InfraError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(InfraError::connection)?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "OK").await;
                return Err(InfraError::channel(e));
            }
        };

        tracing::debug!("投入用のブローカー接続を開きました");
        Ok(PooledChannel {
            connection,
            channel,
        })
    }

    fn checkin(&self, slot: PooledChannel) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);
    }
}

/// 貸し出し中のチャネル
///
/// ドロップ時に健全ならプールへ戻し、壊れていれば接続を閉じて捨てる。
pub struct ChannelGuard<'a> {
    pool:    &'a ChannelPool,
    slot:    Option<PooledChannel>,
    broken:  bool,
    _permit: SemaphorePermit<'a>,
}

impl ChannelGuard<'_> {
    pub fn channel(&self) -> &Channel {
        // slot は Drop でのみ取り出される
        match &self.slot {
            Some(slot) => &slot.channel,
            None => unreachable!("ChannelGuard は Drop 前に slot を失わない"),
        }
    }

    /// この接続をプールに戻さない
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        if !self.broken && slot.is_open() && !self.pool.permits.is_closed() {
            self.pool.checkin(slot);
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(slot.close());
        }
    }
}
