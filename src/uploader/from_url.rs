// URL 导入
//
// 委托服务端抓取远端 URL: POST /from_url/ 受理后返回追踪 token，
// 随后以双路并行等待终态：
// - 推送：PushChannel 订阅 task-status-{token} 事件
// - 轮询：按带抖动的间隔请求 /from_url/status/
// 先到达的终态记胜（settle-once），另一路的结果作废。
// 推送通道故障不影响结果，轮询始终兜底。

use crate::api::endpoints;
use crate::api::{FileInfo, FromUrlResponse, ImportStatus, Transport};
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::pusher::PushChannel;
use crate::retry::retry_if_throttled;
use crate::task::UploadTask;
use crate::uploader::direct::poll_until_ready;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 抓取阶段占总进度的份额，余量留给就绪等待
const FETCH_PROGRESS_SHARE: f64 = 0.9;

/// 轮询间隔抖动幅度 (±15%)
const POLL_JITTER: f64 = 0.15;

/// 给轮询间隔加随机抖动，避免多任务同步轰击状态端点
fn jittered(interval: Duration) -> Duration {
    let factor = 1.0 - POLL_JITTER + rand::thread_rng().gen::<f64>() * POLL_JITTER * 2.0;
    interval.mul_f64(factor)
}

/// 处理一条状态通知
///
/// 终态经过 settle-once 裁决：竞争中落败的一方返回 None。
/// 非终态推进任务进度后继续等待。
fn apply_status(task: &UploadTask, status: ImportStatus) -> Option<UploadResult<FileInfo>> {
    match status {
        ImportStatus::Waiting => None,
        ImportStatus::Progress { done, total } => {
            if total > 0 {
                task.set_progress(done as f64 / total as f64 * FETCH_PROGRESS_SHARE);
            }
            None
        }
        ImportStatus::Success(info) => task.try_settle().then(|| Ok(info)),
        ImportStatus::Error { error } => task
            .try_settle()
            .then(|| Err(UploadError::service(500, error))),
        ImportStatus::Unknown => task
            .try_settle()
            .then(|| Err(UploadError::service(404, "导入 token 未知或已过期"))),
    }
}

/// 双路等待导入终态
async fn tracking_loop(
    transport: &dyn Transport,
    options: &UploadOptions,
    task: &UploadTask,
    import_token: &str,
    mut push_rx: mpsc::UnboundedReceiver<ImportStatus>,
) -> UploadResult<FileInfo> {
    let cancel = task.cancel_token();
    let mut poll_failures = 0usize;
    let mut push_open = true;
    let mut deadline = Instant::now() + jittered(options.from_url_poll_interval());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),

            // 推送侧关闭后停止轮询该分支，轮询分支独自兜底
            pushed = push_rx.recv(), if push_open => {
                match pushed {
                    Some(status) => {
                        debug!("推送通知: token={}", import_token);
                        if let Some(outcome) = apply_status(task, status) {
                            return outcome;
                        }
                    }
                    None => push_open = false,
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                match endpoints::from_url_status(transport, options, import_token).await {
                    Ok(status) => {
                        poll_failures = 0;
                        if let Some(outcome) = apply_status(task, status) {
                            return outcome;
                        }
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        poll_failures += 1;
                        warn!(
                            "导入状态轮询失败 ({}/{}): {}",
                            poll_failures, options.ready_poll_max_attempts, e
                        );
                        if poll_failures >= options.ready_poll_max_attempts.max(1) {
                            return Err(e);
                        }
                    }
                }
                deadline = Instant::now() + jittered(options.from_url_poll_interval());
            }
        }
    }
}

/// URL 导入入口
pub(crate) async fn upload_from_url(
    transport: &dyn Transport,
    push: Option<&Arc<dyn PushChannel>>,
    options: &UploadOptions,
    task: &UploadTask,
    source_url: &str,
) -> UploadResult<FileInfo> {
    let token = task.cancel_token();
    token.ensure_active()?;

    if !source_url.starts_with("http://") && !source_url.starts_with("https://") {
        return Err(UploadError::validation(format!(
            "source_url 必须是 http(s) 地址: {}",
            source_url
        )));
    }

    debug!("URL 导入开始: {}", source_url);

    let resp = retry_if_throttled(
        || endpoints::from_url(transport, options, source_url),
        options.retry_throttled_request_max_times,
        token,
    )
    .await?;

    let import_token = match resp {
        // 重复 URL 直接命中既有文件
        FromUrlResponse::FileInfo(info) => {
            debug!("URL 查重命中既有文件: {}", info.uuid);
            task.emit_uploaded(&info.uuid);
            task.set_progress(FETCH_PROGRESS_SHARE);
            if info.is_ready {
                return Ok(info);
            }
            return poll_until_ready(transport, options, task, &info.uuid).await;
        }
        FromUrlResponse::Token { token } => token,
    };

    // 推送订阅先于首次轮询建立，保证不漏事件
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(push) = push {
        let tx = tx.clone();
        push.subscribe(
            &import_token,
            Arc::new(move |status| {
                let _ = tx.send(status);
            }),
        );
    }

    let result = tracking_loop(transport, options, task, &import_token, rx).await;

    if let Some(push) = push {
        push.unsubscribe(&import_token);
    }

    let info = result?;
    task.emit_uploaded(&info.uuid);
    task.set_progress(FETCH_PROGRESS_SHARE);

    if info.is_ready {
        return Ok(info);
    }
    poll_until_ready(transport, options, task, &info.uuid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockTransport;
    use crate::pusher::ImportStatusHandler;
    use parking_lot::Mutex;

    fn options() -> UploadOptions {
        let mut opts = UploadOptions::new("demopublickey");
        opts.from_url_poll_interval_ms = 5;
        opts.ready_poll_interval_ms = 1;
        opts
    }

    const READY_FILE: &str = r#"{"status": "success", "uuid": "u1", "is_ready": true, "size": 100}"#;

    #[tokio::test]
    async fn test_invalid_scheme_rejected_before_any_request() {
        let mock = MockTransport::new();
        let task = UploadTask::new();

        let err = upload_from_url(&mock, None, &options(), &task, "ftp://example.com/a.bin")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Validation(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_url_short_circuits() {
        let mock = MockTransport::new();
        mock.enqueue_json(
            "/from_url/",
            200,
            r#"{"type": "file_info", "uuid": "dup", "is_ready": true}"#,
        );

        let task = UploadTask::new();
        let info = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap();

        assert_eq!(info.uuid, "dup");
        // 无需追踪
        assert_eq!(mock.request_count("/from_url/status/"), 0);
    }

    #[tokio::test]
    async fn test_poll_resolves_after_progress() {
        crate::test_support::init_tracing();
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        mock.enqueue_json(
            "/from_url/status/",
            200,
            r#"{"status": "progress", "done": 50, "total": 100}"#,
        );
        mock.enqueue_json("/from_url/status/", 200, READY_FILE);

        let task = UploadTask::new();
        let progress_log = Arc::new(Mutex::new(Vec::new()));
        let log = progress_log.clone();
        task.on_progress(move |ratio| log.lock().push(ratio));

        let info = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap();

        assert_eq!(info.uuid, "u1");
        assert!(mock.request_count("/from_url/status/") >= 2);
        // 观察到抓取中的进度
        assert!(progress_log.lock().iter().any(|r| (*r - 0.45).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_import_error_becomes_service_error() {
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        mock.enqueue_json(
            "/from_url/status/",
            200,
            r#"{"status": "error", "error": "fetch failed"}"#,
        );

        let task = UploadTask::new();
        let err = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::service(500, "fetch failed"));
    }

    #[tokio::test]
    async fn test_unknown_token_is_terminal() {
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        mock.enqueue_json("/from_url/status/", 200, r#"{"status": "unknown"}"#);

        let task = UploadTask::new();
        let err = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Service { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_success_not_ready_falls_back_to_info_poll() {
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        mock.enqueue_json(
            "/from_url/status/",
            200,
            r#"{"status": "success", "uuid": "u1", "is_ready": false}"#,
        );
        mock.enqueue_json("/info/", 200, r#"{"uuid": "u1", "is_ready": true}"#);

        let task = UploadTask::new();
        let info = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap();

        assert!(info.is_ready);
        assert_eq!(mock.request_count("/info/"), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_tracking() {
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        // 永不终止
        mock.enqueue_json("/from_url/status/", 200, r#"{"status": "waiting"}"#);

        let task = UploadTask::new();
        let t = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });

        let err = upload_from_url(&mock, None, &options(), &task, "https://example.com/cat.jpg")
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::Cancelled);
    }

    /// 订阅即同步送达一条 Success 的推送通道
    struct InstantPush {
        status: ImportStatus,
        unsubscribed: Arc<Mutex<Vec<String>>>,
    }

    impl PushChannel for InstantPush {
        fn subscribe(&self, _token: &str, handler: ImportStatusHandler) {
            handler(self.status.clone());
        }

        fn unsubscribe(&self, token: &str) {
            self.unsubscribed.lock().push(token.to_string());
        }
    }

    #[tokio::test]
    async fn test_push_resolves_before_poll() {
        let mock = MockTransport::new();
        mock.enqueue_json("/from_url/", 200, r#"{"type": "token", "token": "t1"}"#);
        // 轮询路径永远只给非终态
        mock.enqueue_json(
            "/from_url/status/",
            200,
            r#"{"status": "progress", "done": 1, "total": 100}"#,
        );

        let unsubscribed = Arc::new(Mutex::new(Vec::new()));
        let push: Arc<dyn PushChannel> = Arc::new(InstantPush {
            status: serde_json::from_str(READY_FILE).unwrap(),
            unsubscribed: unsubscribed.clone(),
        });

        let task = UploadTask::new();
        let info = upload_from_url(
            &mock,
            Some(&push),
            &options(),
            &task,
            "https://example.com/cat.jpg",
        )
        .await
        .unwrap();

        // 推送路径先到终态；退订已发生
        assert_eq!(info.uuid, "u1");
        assert_eq!(unsubscribed.lock().as_slice(), ["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_push_channel_still_resolves_by_poll() {
        // 推送发送端全部丢弃后，轮询路径必须独自收敛
        let mock = MockTransport::new();
        mock.enqueue_json(
            "/from_url/status/",
            200,
            r#"{"status": "progress", "done": 10, "total": 100}"#,
        );
        mock.enqueue_json("/from_url/status/", 200, READY_FILE);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(tx);

        let task = UploadTask::new();
        let info = tracking_loop(&mock, &options(), &task, "t1", rx)
            .await
            .unwrap();

        assert_eq!(info.uuid, "u1");
        assert!(mock.request_count("/from_url/status/") >= 2);
    }

    #[tokio::test]
    async fn test_terminal_status_settles_exactly_once() {
        let task = UploadTask::new();
        let success: ImportStatus = serde_json::from_str(READY_FILE).unwrap();

        // 推送与轮询各送达一次终态，仅首个胜出
        let first = apply_status(&task, success.clone());
        assert!(matches!(first, Some(Ok(_))));
        let second = apply_status(&task, success);
        assert!(second.is_none());
    }
}
