// dev_broker/src/broker/connection_manager.rs

//! 活动客户端与主题订阅的并发索引。

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use rust_messaging_session::TransportCommand;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::client_session::ClientSession;

/// 某个目的地上的一个订阅者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub client_id: Uuid,
    /// 客户端在 SUBSCRIBE 帧中给出的 `id`。
    pub subscription_id: String,
}

/// 管理所有客户端会话和它们的订阅。
#[derive(Debug)]
pub struct ConnectionManager {
    /// 所有活动的客户端会话。
    pub clients: Arc<DashMap<Uuid, Arc<ClientSession>>>,
    /// 目的地 -> 订阅者列表 (按订阅先后排列)。
    subscriptions: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        info!("[连接管理器] 正在创建新的 ConnectionManager 实例。");
        Self {
            clients: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    /// 为新连接创建会话并登记。
    pub fn add_client(
        &self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<TransportCommand>,
    ) -> Arc<ClientSession> {
        let client_id = Uuid::new_v4();
        let client_session = Arc::new(ClientSession::new(client_id, sender, addr));
        self.clients.insert(client_id, Arc::clone(&client_session));
        info!("[连接管理器] 新客户端连接: id={}, addr={}", client_id, addr);
        debug!("[连接管理器] 当前活动客户端总数: {}", self.clients.len());
        client_session
    }

    pub fn get_client(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        self.clients.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    /// 移除客户端、清理其全部订阅并关闭连接。
    pub fn remove_client(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        match self.clients.remove(client_id) {
            Some((_id, session)) => {
                let dropped = self.drop_subscriptions_of(client_id);
                session.close();
                info!(
                    "[连接管理器] 客户端断开连接: id={}, addr={}，清理了 {} 个订阅。",
                    session.client_id, session.addr, dropped
                );
                debug!("[连接管理器] 移除后当前活动客户端总数: {}", self.clients.len());
                Some(session)
            }
            None => {
                debug!("[连接管理器] 尝试移除不存在的客户端: id={}", client_id);
                None
            }
        }
    }

    /// 登记订阅。同一客户端重复使用同一个订阅 ID 时，旧的订阅被替换。
    pub fn subscribe(&self, client_id: Uuid, subscription_id: &str, destination: &str) {
        self.unsubscribe(&client_id, subscription_id);
        self.subscriptions
            .entry(destination.to_string())
            .or_default()
            .push(Subscriber {
                client_id,
                subscription_id: subscription_id.to_string(),
            });
        info!(
            "[连接管理器] 客户端 {} 订阅了 {} (订阅ID: {})",
            client_id, destination, subscription_id
        );
    }

    /// 按订阅 ID 取消订阅。未找到时返回 `false`。
    pub fn unsubscribe(&self, client_id: &Uuid, subscription_id: &str) -> bool {
        let mut removed = false;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.value().len();
            entry
                .value_mut()
                .retain(|s| !(s.client_id == *client_id && s.subscription_id == subscription_id));
            removed |= entry.value().len() != before;
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        if removed {
            info!("[连接管理器] 客户端 {} 取消了订阅 {}", client_id, subscription_id);
        }
        removed
    }

    /// 某个目的地当前的全部订阅者及其会话。
    pub fn subscribers(&self, destination: &str) -> Vec<(Arc<ClientSession>, String)> {
        let subscribers: Vec<Subscriber> = match self.subscriptions.get(destination) {
            Some(entry) => entry.value().clone(),
            None => return Vec::new(),
        };
        subscribers
            .into_iter()
            .filter_map(|s| match self.get_client(&s.client_id) {
                Some(session) => Some((session, s.subscription_id)),
                None => {
                    warn!("[连接管理器] 订阅者 {} 已不在活动客户端列表中，跳过。", s.client_id);
                    None
                }
            })
            .collect()
    }

    /// 某个客户端的订阅数量。
    pub fn subscription_count(&self, client_id: &Uuid) -> usize {
        self.subscriptions
            .iter()
            .map(|entry| entry.value().iter().filter(|s| s.client_id == *client_id).count())
            .sum()
    }

    /// 当前所有活动会话的快照。
    pub fn get_all_client_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn drop_subscriptions_of(&self, client_id: &Uuid) -> usize {
        let mut dropped = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|s| s.client_id != *client_id);
            dropped += before - entry.value().len();
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        dropped
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
