// rust_messaging_session/src/session/shared.rs

//! 引用计数的共享会话。
//!
//! 多个互相独立的使用者 (例如多个页面) 共用同一条连接时，各自通过
//! [`SharedSession::acquire`] 获得一个 [`SessionLease`]。租约记录自己订阅过的主题，
//! 释放时只退订这些主题；最后一个租约释放时才真正断开会话。

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::message::InboundMessage;
use crate::session::{Session, SubscriptionHandle};

struct SharedInner {
    session: Session,
    consumers: Mutex<usize>,
}

impl SharedInner {
    fn release_one(&self) {
        let mut consumers = self.consumers.lock();
        *consumers = consumers.saturating_sub(1);
        if *consumers == 0 {
            info!("[共享会话] 最后一个使用者已释放，断开会话。");
            self.session.disconnect();
        } else {
            debug!("[共享会话] 使用者已释放，剩余 {} 个。", *consumers);
        }
    }
}

/// 可在多个使用者之间共享的会话。克隆得到同一个共享会话。
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<SharedInner>,
}

impl SharedSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::from_session(Session::new(config))
    }

    /// 包装一个已有的会话。
    pub fn from_session(session: Session) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                session,
                consumers: Mutex::new(0),
            }),
        }
    }

    /// 登记一个使用者并确保会话已连接。
    ///
    /// 连接失败时该使用者不计入，错误原样返回。
    pub async fn acquire(&self) -> Result<SessionLease, SessionError> {
        {
            let mut consumers = self.inner.consumers.lock();
            *consumers += 1;
            debug!("[共享会话] 新使用者登记，当前 {} 个。", *consumers);
        }
        match self.inner.session.connect().await {
            Ok(()) => Ok(SessionLease {
                inner: self.inner.clone(),
                handles: Vec::new(),
                released: false,
            }),
            Err(err) => {
                self.inner.release_one();
                Err(err)
            }
        }
    }

    /// 当前持有租约的使用者数量。
    pub fn consumers(&self) -> usize {
        *self.inner.consumers.lock()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }
}

/// 一个使用者对共享会话的租约。释放或丢弃时退订自己的主题。
pub struct SessionLease {
    inner: Arc<SharedInner>,
    handles: Vec<SubscriptionHandle>,
    released: bool,
}

impl SessionLease {
    /// 订阅主题，并把句柄记入本租约。
    pub fn subscribe<F>(&mut self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let handle = self.inner.session.subscribe(topic, handler);
        self.handles.retain(|existing| existing.topic() != handle.topic());
        self.handles.push(handle.clone());
        handle
    }

    /// 退订本租约订阅的主题。其他使用者之后替换过的订阅不受影响。
    pub fn unsubscribe(&mut self, topic: &str) {
        if let Some(index) = self.handles.iter().position(|handle| handle.topic() == topic) {
            let handle = self.handles.remove(index);
            handle.cancel();
        }
    }

    pub fn send<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), SessionError> {
        self.inner.session.send(destination, payload)
    }

    pub fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError> {
        self.inner.session.send_text(destination, text)
    }

    /// 本租约订阅的主题。
    pub fn topics(&self) -> Vec<String> {
        self.handles.iter().map(|handle| handle.topic().to_string()).collect()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// 显式释放租约。
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
        self.inner.release_one();
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}
