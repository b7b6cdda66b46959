// common_models/src/topics.rs

//! 主题与发布目的地的命名约定。
//!
//! - `/topic/<resource>`: 代理扇出的广播主题。
//! - `/topic/<resource>/{entityId}`: 针对单个实体的定向主题，例如某个用户的提醒。
//! - `/app/<action>`: 客户端向服务端发布消息的目的地。

/// 广播主题前缀。
pub const TOPIC_PREFIX: &str = "/topic";
/// 客户端发布目的地前缀。
pub const APP_PREFIX: &str = "/app";

/// 学习提醒资源名。
pub const REMINDERS: &str = "reminders";
/// 聊天资源名。
pub const CHAT: &str = "chat";
/// 邮箱确认资源名。
pub const EMAIL_CONFIRMATION: &str = "email-confirmation";
/// 联调用的回显资源名。
pub const ECHO: &str = "echo";

/// 构造广播主题，例如 `topic("chat")` 得到 `/topic/chat`。
pub fn topic(resource: &str) -> String {
    format!("{}/{}", TOPIC_PREFIX, resource.trim_matches('/'))
}

/// 构造针对单个实体的定向主题，例如 `entity_topic("reminders", "42")` 得到 `/topic/reminders/42`。
pub fn entity_topic(resource: &str, entity_id: &str) -> String {
    format!("{}/{}", topic(resource), entity_id)
}

/// 某个用户的学习提醒主题。
pub fn reminder_topic(user_id: &str) -> String {
    entity_topic(REMINDERS, user_id)
}

/// 构造客户端发布目的地，例如 `app_destination("chat")` 得到 `/app/chat`。
pub fn app_destination(action: &str) -> String {
    format!("{}/{}", APP_PREFIX, action.trim_matches('/'))
}

/// 判断目的地是否为广播主题。
pub fn is_topic(destination: &str) -> bool {
    destination
        .strip_prefix(TOPIC_PREFIX)
        .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1)
}

/// 如果目的地是 `/app/<action>`，返回 `<action>` 部分。
pub fn app_action(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(APP_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|action| !action.is_empty())
}
