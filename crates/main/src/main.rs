//! 主应用程序入口
//!
//! 连接消息代理，注册路由表并启动 RPC 传输、在线状态清扫任务，
//! 直到收到 Ctrl-C 后优雅退出。

use application::{
    BrokerRouter, ChatMessageRoute, CredentialIssueRoute, CredentialIssuer,
    PresenceDisconnectRoute, PresenceHeartbeatRoute, PresenceSettings, PresenceTracker, Route,
    SystemClock,
};
use infrastructure::{BrokerClient, BrokerTransport, RedisLastSeenStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::AppConfig::from_env();

    tracing::info!(
        url = %config.broker.url,
        client_id = %config.broker.client_id,
        "连接消息代理"
    );
    let client = Arc::new(BrokerClient::connect(&config.broker).await?);

    let clock: Arc<dyn application::Clock> = Arc::new(SystemClock);

    // 凭证签发是可选能力，账户未配置时对应路由不注册
    let issuer = match CredentialIssuer::new(&config.account) {
        Ok(issuer) => {
            tracing::info!(account = %issuer.account_public_key(), "凭证签发服务已就绪");
            Some(Arc::new(issuer))
        }
        Err(e) => {
            tracing::warn!(error = %e, "凭证签发服务未启用");
            None
        }
    };

    // 在线状态跟踪器和后台清扫任务
    let last_seen = Arc::new(RedisLastSeenStore::new(client.clone()));
    let tracker = Arc::new(PresenceTracker::new(
        client.clone() as Arc<dyn application::BrokerPublisher>,
        last_seen,
        clock.clone(),
        PresenceSettings::from(&config.presence),
    ));
    let sweeper = tracker.start_sweeper();

    // 路由表：发送消息走请求/响应，心跳和下线是纯事件
    let mut router = BrokerRouter::new();
    router.add_route(
        "chat.message.send",
        Route::request(Arc::new(ChatMessageRoute::new(clock))),
    );
    router.add_route(
        "chat.presence.heartbeat",
        Route::event(Arc::new(PresenceHeartbeatRoute::new(tracker.clone()))),
    );
    router.add_route(
        "chat.presence.disconnect",
        Route::event(Arc::new(PresenceDisconnectRoute::new(tracker.clone()))),
    );
    if let Some(issuer) = issuer {
        router.add_route(
            "chat.credentials.issue",
            Route::request(Arc::new(CredentialIssueRoute::new(issuer))),
        );
    }

    let transport = BrokerTransport::new(client.clone(), router, &config.transport);
    let subscriptions = transport.listen().await?;

    tracing::info!(subscriptions = subscriptions.len(), "服务已启动");

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号，开始关闭");

    // 先排空在途消息再停订阅，处理到一半的消息不会被掐断
    client.disconnect(true).await;
    drop(subscriptions);
    sweeper.abort();

    Ok(())
}
