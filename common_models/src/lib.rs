//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了实时消息会话客户端 (`rust_messaging_session`)、开发用消息代理
//! (`dev_broker`) 以及前端页面之间共享的数据结构与主题命名约定。
//!
//! 主要包含：
//! - **消息负载 (`ws_payloads`)**: 通过主题推送或由客户端发布的各类业务消息负载，
//!   例如学习提醒、聊天消息、邮箱确认通知以及用于联调的 Echo 负载。
//! - **主题命名 (`topics`)**: `/topic/<resource>` 广播主题、`/topic/reminders/{userId}`
//!   定向主题以及 `/app/<action>` 客户端发布目的地的构造与判定函数。
//!
//! 所有模型都派生 `Serialize`、`Deserialize`、`Debug`、`Clone`，以 JSON 形式在网络上传输。

pub mod topics; // 主题与目的地命名约定
pub mod ws_payloads; // 各类消息负载结构体
