// dev_broker/src/broker/heartbeat_monitor.rs

//! 心跳监视器。
//!
//! 定期检查所有客户端的最近活跃时间。超过 `client_timeout_duration` 没有收到任何数据
//! (帧或心跳) 的客户端会被移除并断开，避免残留的僵尸连接。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::broker::connection_manager::ConnectionManager;

pub struct HeartbeatMonitor {
    connection_manager: Arc<ConnectionManager>,
    /// 客户端被判定为超时的最大不活动时长。
    client_timeout_duration: Duration,
    /// 检查周期。
    check_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        client_timeout_duration: Duration,
        check_interval: Duration,
    ) -> Self {
        info!(
            "[心跳监视器] 创建 HeartbeatMonitor。客户端超时阈值: {:?}，检查周期: {:?}",
            client_timeout_duration, check_interval
        );
        Self {
            connection_manager,
            client_timeout_duration,
            check_interval,
        }
    }

    /// 持续运行检查循环，直到所在任务被取消。
    pub async fn run(self) {
        info!("[心跳监视器] 后台检查循环已启动。");
        loop {
            sleep(self.check_interval).await;
            let removed = self.check_for_timed_out_clients().await;
            debug!("[心跳监视器] 本轮检查完成，移除了 {} 个超时客户端。", removed);
        }
    }

    /// 执行一轮检查，返回被移除的客户端数量。
    pub async fn check_for_timed_out_clients(&self) -> usize {
        let clients_snapshot = self.connection_manager.get_all_client_sessions();
        if clients_snapshot.is_empty() {
            return 0;
        }

        let chrono_timeout = match chrono::Duration::from_std(self.client_timeout_duration) {
            Ok(timeout) => timeout,
            Err(e) => {
                warn!(
                    "[心跳监视器] 无法转换超时时长 {:?}: {}。改用默认的 60 秒。",
                    self.client_timeout_duration, e
                );
                chrono::Duration::seconds(60)
            }
        };

        let now = Utc::now();
        let mut removed = 0;
        for client in clients_snapshot {
            let last_seen = *client.last_seen.read().await;
            if now.signed_duration_since(last_seen) > chrono_timeout {
                warn!(
                    "[心跳监视器] 客户端 {} (ID: {}) 超时，最后活跃: {}，阈值: {:?}。正在移除。",
                    client.addr, client.client_id, last_seen, self.client_timeout_duration
                );
                if self.connection_manager.remove_client(&client.client_id).is_some() {
                    removed += 1;
                }
            } else {
                debug!("[心跳监视器] 客户端 {} (ID: {}) 仍然活跃。", client.addr, client.client_id);
            }
        }
        removed
    }
}
