// 单次直传
//
// 小文件走 /base/ 一次性提交完整载荷，随后轮询 /info/ 等待
// 服务端处理就绪。轮询次数有上限，瞬时失败也消耗次数。

use crate::api::endpoints;
use crate::api::{FileInfo, Transport};
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::retry::retry_if_throttled;
use crate::task::UploadTask;
use tracing::{debug, warn};

/// 轮询 /info/ 直至文件就绪
///
/// 未就绪与瞬时错误都消耗一次尝试；耗尽后以最后一次错误失败，
/// 全程未出错则视为处理超时。
pub(crate) async fn poll_until_ready(
    transport: &dyn Transport,
    options: &UploadOptions,
    task: &UploadTask,
    uuid: &str,
) -> UploadResult<FileInfo> {
    let token = task.cancel_token();
    let max_attempts = options.ready_poll_max_attempts.max(1);
    let mut last_error: Option<UploadError> = None;

    for attempt in 1..=max_attempts {
        token.ensure_active()?;

        match endpoints::info(transport, options, uuid).await {
            Ok(info) if info.is_ready => {
                debug!("文件 {} 已就绪 (第 {} 次轮询)", uuid, attempt);
                return Ok(info);
            }
            Ok(_) => {
                last_error = None;
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("就绪轮询失败 ({}/{}): {}", attempt, max_attempts, e);
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(options.ready_poll_interval()) => {}
                _ = token.cancelled() => return Err(UploadError::Cancelled),
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| UploadError::service(408, format!("文件 {} 处理未在限定时间内就绪", uuid))))
}

/// 单次直传入口
///
/// # 参数
/// * `data` - 完整文件内容
/// * `file_name` / `content_type` - 已解析的有效文件名与类型
pub(crate) async fn upload_direct(
    transport: &dyn Transport,
    options: &UploadOptions,
    task: &UploadTask,
    data: Vec<u8>,
    file_name: &str,
    content_type: &str,
) -> UploadResult<FileInfo> {
    let token = task.cancel_token();
    token.ensure_active()?;

    debug!("直传开始: {} ({} bytes)", file_name, data.len());

    let resp = retry_if_throttled(
        || endpoints::base_upload(transport, options, data.clone(), file_name, content_type),
        options.retry_throttled_request_max_times,
        token,
    )
    .await?;

    // 服务端已接收完整载荷，余下进度留给就绪等待
    task.emit_uploaded(&resp.file);
    task.set_progress(0.9);

    poll_until_ready(transport, options, task, &resp.file).await
}
