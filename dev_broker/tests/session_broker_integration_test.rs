// dev_broker/tests/session_broker_integration_test.rs

//! 真实 `Session` 与开发代理之间的端到端测试 (本地回环 WebSocket)。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_models::topics;
use common_models::ws_payloads::{ChatMessagePayload, EchoPayload};
use dev_broker::broker::{BrokerService, ConnectionManager};
use dev_broker::config::BrokerConfig;
use futures_util::{SinkExt, StreamExt};
use log::LevelFilter;
use rust_messaging_session::{
    Command, ConnectionState, Frame, FrameCodec, InboundMessage, Session, SessionConfig,
    SharedSession, StompCodec, WireItem,
};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

async fn start_broker(
    heartbeat_send_ms: u64,
    heartbeat_expect_ms: u64,
) -> (SocketAddr, Arc<ConnectionManager>) {
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_send_ms,
        heartbeat_expect_ms,
        ..BrokerConfig::default()
    };
    let manager = Arc::new(ConnectionManager::new());
    let service = Arc::new(BrokerService::new(config, Arc::clone(&manager)));
    let (addr, _handle) = service.spawn().await.expect("开发代理启动失败");
    (addr, manager)
}

fn session_config(addr: SocketAddr) -> SessionConfig {
    SessionConfig::new(format!("ws://{}/ws", addr))
        .with_connect_timeout(Duration::from_secs(3))
        .with_reconnect_delay(Duration::from_millis(50))
        .with_heartbeat(Duration::ZERO, Duration::ZERO)
        .with_max_reconnect_attempts(2)
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn collector() -> (
    Arc<Mutex<Vec<InboundMessage>>>,
    impl Fn(InboundMessage) + Send + Sync + 'static,
) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (received, move |message| sink.lock().unwrap().push(message))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_echo_round_trip_through_broker() {
    init_test_logger();
    let (addr, manager) = start_broker(0, 0).await;
    let session = Session::new(session_config(addr));
    session.connect().await.expect("连接开发代理失败");
    assert_eq!(session.state(), ConnectionState::Connected);

    let echo_topic = topics::topic(topics::ECHO);
    let (received, handler) = collector();
    session.subscribe(echo_topic.as_str(), handler);
    assert!(wait_until(|| manager.subscribers(&echo_topic).len() == 1).await, "代理应登记订阅");

    let payload = EchoPayload {
        content: "你好，代理".to_string(),
    };
    session
        .send(&topics::app_destination(topics::ECHO), &payload)
        .expect("发送失败");
    assert!(wait_until(|| received.lock().unwrap().len() == 1).await, "应收到回显");

    let message = received.lock().unwrap()[0].clone();
    assert_eq!(message.destination, echo_topic);
    assert_eq!(message.deserialize::<EchoPayload>().unwrap(), payload);

    session.disconnect();
    assert!(wait_until(|| manager.client_count() == 0).await, "断开后代理应移除客户端");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_messages_fan_out_to_every_subscribed_session() {
    init_test_logger();
    let (addr, manager) = start_broker(0, 0).await;
    let chat_topic = topics::topic(topics::CHAT);

    let alice = Session::new(session_config(addr));
    let bob = Session::new(session_config(addr));
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    let (alice_inbox, alice_handler) = collector();
    let (bob_inbox, bob_handler) = collector();
    alice.subscribe(chat_topic.as_str(), alice_handler);
    bob.subscribe(chat_topic.as_str(), bob_handler);
    assert!(wait_until(|| manager.subscribers(&chat_topic).len() == 2).await);

    let chat = ChatMessagePayload::new("alice", "大家好");
    alice.send(&topics::app_destination(topics::CHAT), &chat).unwrap();
    assert!(
        wait_until(|| {
            alice_inbox.lock().unwrap().len() == 1 && bob_inbox.lock().unwrap().len() == 1
        })
        .await
    );
    assert_eq!(bob_inbox.lock().unwrap()[0].deserialize::<ChatMessagePayload>().unwrap(), chat);

    bob.unsubscribe(&chat_topic);
    assert!(wait_until(|| manager.subscribers(&chat_topic).len() == 1).await, "退订应同步到代理");

    alice.send_text(&chat_topic, "纯文本").unwrap();
    assert!(wait_until(|| alice_inbox.lock().unwrap().len() == 2).await);
    assert_eq!(alice_inbox.lock().unwrap()[1].text(), "纯文本");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(bob_inbox.lock().unwrap().len(), 1, "退订后不应再收到消息");

    alice.disconnect();
    bob.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeats_keep_session_alive() {
    init_test_logger();
    let (addr, manager) = start_broker(100, 100).await;
    let session = Session::new(
        session_config(addr).with_heartbeat(Duration::from_millis(100), Duration::from_millis(100)),
    );
    session.connect().await.unwrap();

    // 远超过 2 倍心跳间隔，双向心跳都在工作时连接保持不变。
    sleep(Duration::from_millis(800)).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.retry_count(), 0);
    assert_eq!(manager.client_count(), 1);

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_session_disconnects_after_last_lease() {
    init_test_logger();
    let (addr, manager) = start_broker(0, 0).await;
    let shared = SharedSession::new(session_config(addr));

    let mut first = shared.acquire().await.unwrap();
    let mut second = shared.acquire().await.unwrap();
    assert_eq!(shared.consumers(), 2);
    assert_eq!(manager.client_count(), 1, "两个使用者应共享同一条连接");

    let (_inbox, handler) = collector();
    first.subscribe(topics::reminder_topic("7"), handler);
    let (_inbox2, handler2) = collector();
    second.subscribe(topics::topic(topics::CHAT), handler2);

    first.release();
    assert!(shared.session().is_connected(), "仍有使用者时保持连接");
    assert_eq!(shared.session().subscribed_topics(), vec![topics::topic(topics::CHAT)]);

    second.release();
    assert_eq!(shared.consumers(), 0);
    assert_eq!(shared.session().state(), ConnectionState::Disconnected);
    assert!(wait_until(|| manager.client_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_to_unreachable_broker_exhausts_retries() {
    init_test_logger();
    let (addr, _manager) = start_broker(0, 0).await;
    let free_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = Session::new(session_config(addr));
    let result = timeout(
        Duration::from_secs(10),
        session.connect_to(&format!("ws://127.0.0.1:{}/ws", free_port)),
    )
    .await
    .expect("重试应在有限时间内结束");
    assert!(result.is_err());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_gets_error_frame_and_close() {
    init_test_logger();
    let (addr, manager) = start_broker(0, 0).await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.expect("WebSocket 连接失败");

    ws.send(Message::Text("NOT-A-COMMAND\n\nbody\0".to_string())).await.unwrap();

    // 读到关闭为止；超时说明代理没有关闭连接。
    let read = async {
        let mut frames = Vec::new();
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    for item in StompCodec.decode(&text).unwrap() {
                        if let WireItem::Frame(frame) = item {
                            frames.push(frame);
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        frames
    };
    let frames: Vec<Frame> = timeout(Duration::from_secs(5), read).await.expect("代理应关闭连接");

    let frame = frames.last().expect("应收到 ERROR 帧");
    assert_eq!(frame.command, Command::Error);
    assert!(frame.header("message").is_some());
    assert!(wait_until(|| manager.client_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broker_accepts_host_name_in_config() {
    init_test_logger();
    let config = BrokerConfig {
        host: "localhost".to_string(),
        port: 0,
        heartbeat_send_ms: 0,
        heartbeat_expect_ms: 0,
        ..BrokerConfig::default()
    };
    let manager = Arc::new(ConnectionManager::new());
    let service = Arc::new(BrokerService::new(config, Arc::clone(&manager)));
    let (addr, _handle) = service.spawn().await.expect("主机名形式的监听地址应可绑定");
    assert!(addr.ip().is_loopback());

    let session = Session::new(session_config(addr));
    session.connect().await.expect("应能连接到按主机名绑定的代理");
    assert_eq!(manager.client_count(), 1);
    session.disconnect();
}
