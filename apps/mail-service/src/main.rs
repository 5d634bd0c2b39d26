//! # Mail Service サーバー
//!
//! メール送信依頼を HTTP で受け付けてキューに投入し、同じプロセス内で
//! キューを消費して SMTP で配送する。
//!
//! ```text
//! caller ──HTTP──▶ 取り込み API ──publish──▶ [send-email] ──consume──▶ 配送 ──SMTP──▶ relay
//! ```
//!
//! ## 起動順序
//!
//! 1. 設定読み込み（不正なら I/O の前に終了）
//! 2. ブローカー待機（既定では接続できるまで無期限に再試行）
//! 3. キュー消費と HTTP サーバーを並行して実行
//!
//! SIGINT / SIGTERM を受けると HTTP サーバーは新規受付を止め、
//! コンシューマは処理中の 1 件を終えてから終了する。
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `AMQP_URL` | **Yes** | ブローカー接続 URL |
//! | `MAIL_SMTP_HOST` | **Yes** | SMTP ホスト |
//! | `MAIL_SMTP_PORT` | **Yes** | SMTP ポート（1025 ならローカルキャプチャ） |
//! | `MAIL_SMTP_USER` | **Yes** | SMTP ユーザー（空文字列可） |
//! | `MAIL_SMTP_PASS` | **Yes** | SMTP パスワード（空文字列可） |
//! | `HTTP_HOST` | No | バインドする IP アドレス（IPv6 可、デフォルト: `0.0.0.0`） |
//! | `HTTP_PORT` | No | ポート番号（デフォルト: `8080`） |
//! | `MAIL_FROM_ADDRESS` | No | 送信元アドレス |
//! | `MAIL_TRANSPORT` | No | `auto` / `local` / `relay` / `noop`（デフォルト: `auto`） |
//! | `AMQP_QUEUE` | No | キュー名（デフォルト: `send-email`） |
//! | `AMQP_ACK_MODE` | No | `auto` / `after_dispatch`（デフォルト: `auto`） |
//! | `AMQP_PUBLISH_POOL_SIZE` | No | 投入用接続の上限（デフォルト: `4`） |
//! | `BROKER_PROBE_INTERVAL_SECS` | No | ブローカー待機の間隔（デフォルト: `5`） |
//! | `BROKER_PROBE_MAX_ATTEMPTS` | No | ブローカー待機の上限回数（デフォルト: 無制限） |
//! | `BULK_FAILURE_POLICY` | No | `best_effort` / `strict`（デフォルト: `best_effort`） |
//! | `LOG_FORMAT` | No | `json` / `pretty`（デフォルト: `pretty`） |

use std::sync::Arc;

use anyhow::Context as _;
use postbox_infra::{
    broker::{AmqpConnector, AmqpPublisher, AmqpSubscription, QueueConsumer, wait_for_broker},
    mail::build_dispatcher,
};
use postbox_mail_service::{
    app_builder::{build_router, build_state},
    config::AppConfig,
};
use postbox_shared::observability::{TracingConfig, init_tracing};
use tokio::{net::TcpListener, sync::watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    init_tracing(TracingConfig::from_env("mail-service"));

    let config = Arc::new(AppConfig::from_env().context("設定の読み込みに失敗しました")?);
    tracing::info!(
        http.host = %config.http.host,
        http.port = config.http.port,
        queue = %config.broker.queue,
        ack_mode = %config.broker.ack_mode,
        bulk_failure_policy = %config.bulk_failure_policy,
        "Mail Service を起動します"
    );

    let dispatcher = build_dispatcher(config.mail.transport, &config.mail.smtp)?;

    wait_for_broker(&AmqpConnector::new(&config.broker.url), &config.broker.probe).await?;

    let subscription = AmqpSubscription::subscribe(
        &config.broker.url,
        &config.broker.queue,
        config.broker.ack_mode,
    )
    .await?;
    let publisher = Arc::new(AmqpPublisher::new(
        config.broker.url.clone(),
        config.broker.publish_pool_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("シャットダウンシグナルを受信しました");
        let _ = signal_tx.send(true);
    });

    // キュー消費
    let consumer = QueueConsumer::new(dispatcher, config.broker.ack_mode);
    let deliveries = subscription.deliveries();
    let consumer_rx = shutdown_rx.clone();
    let mut consumer_task = tokio::spawn(async move {
        consumer
            .run(deliveries, wait_for_shutdown(consumer_rx))
            .await
    });

    // HTTP サーバー
    let app = build_router(build_state(&config, publisher.clone()));
    let addr = config.http.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("{addr} にバインドできません"))?;
    tracing::info!("Mail Service が起動しました: {}", addr);

    let server_rx = shutdown_rx.clone();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(server_rx))
            .await
    });

    // どちらかが終わったらもう一方も止める
    let (consumer_result, server_result, shutdown_requested) = tokio::select! {
        consumer_result = &mut consumer_task => {
            let requested = *shutdown_rx.borrow();
            let _ = shutdown_tx.send(true);
            (consumer_result, server_task.await, requested)
        }
        server_result = &mut server_task => {
            let requested = *shutdown_rx.borrow();
            let _ = shutdown_tx.send(true);
            (consumer_task.await, server_result, requested)
        }
    };

    subscription.close().await;
    publisher.close().await;

    server_result
        .context("HTTP サーバータスクが異常終了しました")?
        .context("HTTP サーバーエラー")?;

    let stats = consumer_result
        .context("コンシューマタスクが異常終了しました")?
        .context("キューの消費に失敗しました")?;
    tracing::info!(
        delivered = stats.delivered,
        discarded = stats.discarded,
        failed = stats.failed,
        "Mail Service を終了します"
    );

    if !shutdown_requested {
        anyhow::bail!("受信ストリームが予期せず終了しました");
    }
    Ok(())
}

/// 停止要求（または送信側の破棄）まで待つ
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// SIGINT / SIGTERM を待つ
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "SIGINT ハンドラの登録に失敗しました");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM ハンドラの登録に失敗しました");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
