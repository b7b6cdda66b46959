use std::sync::Arc;
use std::time::Duration;

use dev_broker::broker::{BrokerService, ConnectionManager, HeartbeatMonitor};
use log::{info, warn, LevelFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化 (env_logger)，默认级别: Info。");

    let app_config = dev_broker::config::init_config();
    let broker_config = app_config.broker.clone();
    info!("[主程序] 应用配置已加载，监听地址: {}", broker_config.bind_addr());

    let connection_manager = Arc::new(ConnectionManager::new());

    let heartbeat_monitor = HeartbeatMonitor::new(
        Arc::clone(&connection_manager),
        Duration::from_secs(broker_config.client_timeout_seconds),
        Duration::from_secs(broker_config.heartbeat_check_interval_seconds),
    );
    tokio::spawn(async move {
        heartbeat_monitor.run().await;
        warn!("[主程序] 心跳监视器任务意外结束。");
    });

    let service = Arc::new(BrokerService::new(broker_config, connection_manager));
    info!("[主程序] 正在启动 STOMP 开发代理...");
    service.start().await?;
    info!("[主程序] 代理服务已停止，程序退出。");
    Ok(())
}
