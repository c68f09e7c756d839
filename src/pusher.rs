// 推送通知通道
//
// URL 导入的双路完成确认之一：通过 Pusher 协议的 WebSocket
// 长连接接收 task-status-{token} 频道上的 progress/success/fail 事件。
//
// 生命周期（进程级共享句柄，显式传递，不做隐式单例）：
// - 首个订阅者到来时建立连接
// - 连接握手完成（pusher:connection_established）前的出站帧先排队
// - 订阅者归零时关闭连接、回收读写任务
//
// 通道本身的故障只记日志，不使任何上传失败：轮询路径会兜底。

use crate::api::ImportStatus;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// 服务端使用的 Pusher 应用 key
pub const DEFAULT_PUSHER_KEY: &str = "79ae88bd931ea68464d9";

/// 状态事件处理器
pub type ImportStatusHandler = Arc<dyn Fn(ImportStatus) + Send + Sync>;

/// 抽象推送通道能力
///
/// handler 按事件到达顺序被调用零次或多次；unsubscribe 之后不再调用。
pub trait PushChannel: Send + Sync {
    /// 订阅指定 token 的状态事件
    fn subscribe(&self, token: &str, handler: ImportStatusHandler);
    /// 退订
    fn unsubscribe(&self, token: &str);
}

/// token 对应的频道名
fn channel_name(token: &str) -> String {
    format!("task-status-{}", token)
}

/// 入站帧的通用形状
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    /// Pusher 协议里 data 是二次编码的 JSON 字符串
    #[serde(default)]
    data: Option<String>,
}

/// 解析后的入站帧
#[derive(Debug)]
enum PusherFrame {
    /// 握手完成
    Connected,
    /// 某频道上的导入状态事件
    Status { channel: String, status: ImportStatus },
}

/// progress 事件载荷
#[derive(Debug, Deserialize)]
struct ProgressPayload {
    #[serde(default)]
    done: u64,
    #[serde(default)]
    total: u64,
}

/// fail 事件载荷
#[derive(Debug, Deserialize)]
struct FailPayload {
    #[serde(default)]
    msg: String,
}

/// 解析一条入站文本帧；与本客户端无关的事件返回 None
fn parse_frame(text: &str) -> Option<PusherFrame> {
    let frame: InboundFrame = serde_json::from_str(text).ok()?;

    if frame.event == "pusher:connection_established" {
        return Some(PusherFrame::Connected);
    }

    let channel = frame.channel?;
    let data = frame.data?;

    let status = match frame.event.as_str() {
        "progress" => {
            let payload: ProgressPayload = serde_json::from_str(&data).ok()?;
            ImportStatus::Progress {
                done: payload.done,
                total: payload.total,
            }
        }
        "success" => {
            let info = serde_json::from_str(&data).ok()?;
            ImportStatus::Success(info)
        }
        "fail" => {
            let payload: FailPayload = serde_json::from_str(&data).ok()?;
            ImportStatus::Error { error: payload.msg }
        }
        _ => return None,
    };

    Some(PusherFrame::Status { channel, status })
}

/// 构建订阅/退订帧
fn control_frame(event: &str, channel: &str) -> String {
    serde_json::json!({
        "event": event,
        "data": { "channel": channel }
    })
    .to_string()
}

/// 活动连接
struct Connection {
    /// 出站帧通道；丢弃即触发连接任务关闭套接字
    out_tx: mpsc::UnboundedSender<String>,
    /// 当前订阅者数
    subscribers: usize,
}

/// Pusher 推送通道
pub struct Pusher {
    /// WebSocket 地址
    url: String,
    /// 频道 -> 处理器
    handlers: Arc<DashMap<String, ImportStatusHandler>>,
    /// 当前连接（None = 未连接）
    conn: Mutex<Option<Connection>>,
}

impl Pusher {
    /// 使用默认应用 key 创建
    pub fn new() -> Self {
        Self::with_key(DEFAULT_PUSHER_KEY)
    }

    /// 使用指定应用 key 创建
    pub fn with_key(key: &str) -> Self {
        let url = format!(
            "wss://ws.pusherapp.com:443/app/{}?protocol=5&client=rust&version={}",
            key,
            env!("CARGO_PKG_VERSION")
        );
        Self {
            url,
            handlers: Arc::new(DashMap::new()),
            conn: Mutex::new(None),
        }
    }

    /// 连接任务：握手前缓存出站帧，握手后即发即走；
    /// 入站事件按频道分发给处理器
    async fn run_connection(
        url: String,
        mut rx: mpsc::UnboundedReceiver<String>,
        handlers: Arc<DashMap<String, ImportStatusHandler>>,
    ) {
        let (ws, _) = match connect_async(&url).await {
            Ok(v) => v,
            Err(e) => {
                warn!("推送通道连接失败，改由轮询兜底: {}", e);
                // 排空出站请求直到订阅者归零
                while rx.recv().await.is_some() {}
                return;
            }
        };
        info!("推送通道已连接");

        let (mut sink, mut stream) = ws.split();
        let mut established = false;
        let mut pending: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if established {
                            if let Err(e) = sink.send(Message::Text(frame)).await {
                                warn!("推送通道发送失败: {}", e);
                                break;
                            }
                        } else {
                            pending.push(frame);
                        }
                    }
                    // 全部订阅者已退订
                    None => {
                        let _ = sink.close().await;
                        debug!("推送通道已关闭（订阅者归零）");
                        break;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Some(PusherFrame::Connected) => {
                            established = true;
                            for frame in pending.drain(..) {
                                if let Err(e) = sink.send(Message::Text(frame)).await {
                                    warn!("推送通道发送失败: {}", e);
                                    return;
                                }
                            }
                        }
                        Some(PusherFrame::Status { channel, status }) => {
                            if let Some(handler) = handlers.get(&channel) {
                                handler(status);
                            }
                        }
                        None => {}
                    },
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("推送通道读错误: {}", e);
                        break;
                    }
                    None => {
                        debug!("推送通道被服务端关闭");
                        break;
                    }
                },
            }
        }
    }
}

impl Default for Pusher {
    fn default() -> Self {
        Self::new()
    }
}

impl PushChannel for Pusher {
    fn subscribe(&self, token: &str, handler: ImportStatusHandler) {
        let channel = channel_name(token);
        self.handlers.insert(channel.clone(), handler);

        let mut guard = self.conn.lock();
        let conn = guard.get_or_insert_with(|| {
            // 首个订阅者：建立连接
            let (out_tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(Self::run_connection(
                self.url.clone(),
                rx,
                self.handlers.clone(),
            ));
            Connection {
                out_tx,
                subscribers: 0,
            }
        });

        conn.subscribers += 1;
        let _ = conn.out_tx.send(control_frame("pusher:subscribe", &channel));
    }

    fn unsubscribe(&self, token: &str) {
        let channel = channel_name(token);
        self.handlers.remove(&channel);

        let mut guard = self.conn.lock();
        if let Some(conn) = guard.as_mut() {
            let _ = conn
                .out_tx
                .send(control_frame("pusher:unsubscribe", &channel));
            conn.subscribers = conn.subscribers.saturating_sub(1);
            if conn.subscribers == 0 {
                // out_tx 随 Connection 一起丢弃，连接任务随之收尾
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_established() {
        let text = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.1\"}"}"#;
        assert!(matches!(parse_frame(text), Some(PusherFrame::Connected)));
    }

    #[test]
    fn test_parse_progress_frame() {
        let text = r#"{"event":"progress","channel":"task-status-t1","data":"{\"done\":30,\"total\":100}"}"#;
        match parse_frame(text) {
            Some(PusherFrame::Status { channel, status }) => {
                assert_eq!(channel, "task-status-t1");
                assert!(matches!(
                    status,
                    ImportStatus::Progress { done: 30, total: 100 }
                ));
            }
            other => panic!("意外的帧: {:?}", other),
        }
    }

    #[test]
    fn test_parse_success_frame() {
        let text = r#"{"event":"success","channel":"task-status-t1","data":"{\"uuid\":\"abc\",\"is_ready\":true}"}"#;
        match parse_frame(text) {
            Some(PusherFrame::Status { status, .. }) => match status {
                ImportStatus::Success(info) => {
                    assert_eq!(info.uuid, "abc");
                    assert!(info.is_ready);
                }
                other => panic!("意外的状态: {:?}", other),
            },
            other => panic!("意外的帧: {:?}", other),
        }
    }

    #[test]
    fn test_parse_fail_frame() {
        let text = r#"{"event":"fail","channel":"task-status-t1","data":"{\"msg\":\"fetch failed\"}"}"#;
        match parse_frame(text) {
            Some(PusherFrame::Status { status, .. }) => {
                assert!(matches!(status, ImportStatus::Error { error } if error == "fetch failed"));
            }
            other => panic!("意外的帧: {:?}", other),
        }
    }

    #[test]
    fn test_irrelevant_frames_ignored() {
        assert!(parse_frame(r#"{"event":"pusher:ping"}"#).is_none());
        assert!(parse_frame("not json").is_none());
    }

    #[test]
    fn test_control_frame_shape() {
        let frame = control_frame("pusher:subscribe", "task-status-t1");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "pusher:subscribe");
        assert_eq!(value["data"]["channel"], "task-status-t1");
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        // 不真正连网：连接任务会失败并安静退出，只验证订阅计数与注册表
        let pusher = Pusher::with_key("test-key");
        let handler: ImportStatusHandler = Arc::new(|_| {});

        pusher.subscribe("t1", handler.clone());
        pusher.subscribe("t2", handler);
        assert_eq!(pusher.handlers.len(), 2);
        assert!(pusher.conn.lock().is_some());

        pusher.unsubscribe("t1");
        assert_eq!(pusher.handlers.len(), 1);
        assert!(pusher.conn.lock().is_some());

        // 订阅者归零：连接回收
        pusher.unsubscribe("t2");
        assert!(pusher.handlers.is_empty());
        assert!(pusher.conn.lock().is_none());
    }

    #[test]
    fn test_app_key_embedded_in_url() {
        let pusher = Pusher::with_key("custom-key");
        assert!(pusher.url.contains("/app/custom-key?"));

        // 默认构造使用服务端公共 key
        let pusher = Pusher::new();
        assert!(pusher.url.contains(&format!("/app/{}?", DEFAULT_PUSHER_KEY)));
    }
}
