// rust_messaging_session/src/session/registry.rs

//! 主题订阅注册表。
//!
//! 以主题名为键保存订阅记录，并保留首次订阅的先后顺序，重连后按该顺序重放。
//! 每个主题最多只有一个回调，重复订阅会替换回调，但保留原有位置和代理订阅 ID。
//!
//! 注册表本身不做任何 IO：需要向代理发出 SUBSCRIBE/UNSUBSCRIBE 时，
//! 它只返回需要使用的订阅 ID，由会话负责发送。

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::message::InboundMessage;

/// 订阅回调。
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// 一条订阅记录。
#[derive(Clone)]
pub struct SubscriptionRecord {
    /// 主题名。
    pub topic: String,
    /// 当前回调。
    pub handler: MessageHandler,
    /// 每次注册 (包括替换) 分配的新令牌，用于识别过期的订阅句柄。
    pub token: u64,
    /// 代理端订阅 ID，仅在连接状态下存在。
    pub broker_id: Option<String>,
}

impl fmt::Debug for SubscriptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRecord")
            .field("topic", &self.topic)
            .field("token", &self.token)
            .field("broker_id", &self.broker_id)
            .finish()
    }
}

/// 主题订阅注册表。
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    records: IndexMap<String, SubscriptionRecord>,
    next_token: u64,
    next_broker_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或替换 `topic` 的回调，返回本次注册的令牌。
    pub fn upsert(&mut self, topic: &str, handler: MessageHandler) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        match self.records.get_mut(topic) {
            Some(record) => {
                record.handler = handler;
                record.token = token;
            }
            None => {
                self.records.insert(
                    topic.to_string(),
                    SubscriptionRecord {
                        topic: topic.to_string(),
                        handler,
                        token,
                        broker_id: None,
                    },
                );
            }
        }
        token
    }

    /// 移除 `topic` 的记录。
    pub fn remove(&mut self, topic: &str) -> Option<SubscriptionRecord> {
        self.records.shift_remove(topic)
    }

    /// 仅当记录仍是 `token` 对应的那次注册时才移除。
    pub fn remove_if_token(&mut self, topic: &str, token: u64) -> Option<SubscriptionRecord> {
        match self.records.get(topic) {
            Some(record) if record.token == token => self.remove(topic),
            _ => None,
        }
    }

    /// 为尚未物化的记录分配代理订阅 ID；已物化或不存在时返回 `None`。
    pub fn materialize(&mut self, topic: &str) -> Option<String> {
        let record = self.records.get_mut(topic)?;
        if record.broker_id.is_some() {
            return None;
        }
        self.next_broker_id += 1;
        let id = format!("sub-{}", self.next_broker_id);
        record.broker_id = Some(id.clone());
        Some(id)
    }

    /// 按注册顺序物化全部未物化的记录，返回 (主题, 新 ID) 列表。
    pub fn materialize_all(&mut self) -> Vec<(String, String)> {
        let pending: Vec<String> = self
            .records
            .values()
            .filter(|record| record.broker_id.is_none())
            .map(|record| record.topic.clone())
            .collect();
        pending
            .into_iter()
            .filter_map(|topic| self.materialize(&topic).map(|id| (topic, id)))
            .collect()
    }

    /// 连接丢失后，所有代理端订阅都已失效。
    pub fn clear_broker_ids(&mut self) {
        for record in self.records.values_mut() {
            record.broker_id = None;
        }
    }

    /// 当前已物化的 (主题, ID) 列表，按注册顺序。
    pub fn materialized(&self) -> Vec<(String, String)> {
        self.records
            .values()
            .filter_map(|record| record.broker_id.clone().map(|id| (record.topic.clone(), id)))
            .collect()
    }

    /// 按目的地查找，找不到时再按代理订阅 ID 查找。
    pub fn lookup(
        &self,
        destination: Option<&str>,
        subscription: Option<&str>,
    ) -> Option<&SubscriptionRecord> {
        destination
            .and_then(|destination| self.records.get(destination))
            .or_else(|| {
                let id = subscription?;
                self.records
                    .values()
                    .find(|record| record.broker_id.as_deref() == Some(id))
            })
    }

    pub fn get(&self, topic: &str) -> Option<&SubscriptionRecord> {
        self.records.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.records.contains_key(topic)
    }

    /// 按注册顺序返回全部主题。
    pub fn topics(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 清空注册表，返回被移除的记录。
    pub fn clear(&mut self) -> Vec<SubscriptionRecord> {
        self.records.drain(..).map(|(_, record)| record).collect()
    }
}
