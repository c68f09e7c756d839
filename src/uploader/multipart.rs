// 分片上传引擎
//
// 大文件流程: /multipart/start/ 取预签名地址 → 并发 PUT 各分片
// → /multipart/complete/ 合并 → 必要时等待就绪。
//
// 并发调度: Semaphore 控制在途请求数，JoinSet 管理分片任务；
// 任何分片不可重试地失败即中止全部在途任务。进度按已完成
// 分片的字节数汇总，与完成顺序无关，保证单调不减。

use crate::api::endpoints;
use crate::api::{FileInfo, Transport};
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::retry::retry_if_throttled;
use crate::task::UploadTask;
use crate::uploader::chunk::ChunkPlan;
use crate::uploader::direct::poll_until_ready;
use crate::uploader::with_cancel_precedence;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 瞬时传输错误的重试间隔
const PART_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// 上传单个分片，带限流退避与瞬时错误重试
///
/// Throttled 与 Transport 错误消耗尝试次数后重试，
/// 其余错误（服务端拒绝、取消）立即向上传播。
async fn put_part_with_retry(
    transport: &dyn Transport,
    part_url: &str,
    bytes: &[u8],
    content_type: &str,
    max_attempts: usize,
    token: &crate::cancel::CancelToken,
) -> UploadResult<()> {
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        token.ensure_active()?;

        let backoff = match endpoints::multipart_upload_part(
            transport,
            part_url,
            bytes.to_vec(),
            content_type,
        )
        .await
        {
            Ok(()) => return Ok(()),
            Err(UploadError::Throttled { retry_after }) if attempt < max_attempts => {
                debug!("分片被限流，{}ms 后重试 ({}/{})", retry_after.as_millis(), attempt, max_attempts);
                retry_after
            }
            Err(UploadError::Transport(msg)) if attempt < max_attempts => {
                warn!("分片传输失败: {} ({}/{})", msg, attempt, max_attempts);
                PART_RETRY_BACKOFF
            }
            Err(e) => return Err(e),
        };

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = token.cancelled() => return Err(UploadError::Cancelled),
        }
    }

    unreachable!("分片重试循环必定在上限内返回")
}

/// 分片上传入口
pub(crate) async fn upload_multipart(
    transport: Arc<dyn Transport>,
    options: Arc<UploadOptions>,
    task: Arc<UploadTask>,
    data: Arc<Vec<u8>>,
) -> UploadResult<FileInfo> {
    let token = task.cancel_token().clone();
    token.ensure_active()?;

    let total = data.len() as u64;
    debug!("分片上传开始: {} bytes", total);

    let start = retry_if_throttled(
        || endpoints::multipart_start(&*transport, &options, total),
        options.retry_throttled_request_max_times,
        &token,
    )
    .await?;

    let plan = ChunkPlan::new(total, options.multipart_chunk_size);
    if start.parts.len() != plan.chunk_count() {
        return Err(UploadError::service(
            500,
            format!(
                "预签名地址数量 {} 与分片数量 {} 不一致",
                start.parts.len(),
                plan.chunk_count()
            ),
        ));
    }

    let uuid = start.uuid;
    let part_urls = start.parts;
    let content_type = options.effective_content_type().to_string();

    let plan = Arc::new(Mutex::new(plan));
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_requests));
    let mut join_set: JoinSet<(usize, UploadResult<()>)> = JoinSet::new();

    // 调度循环：认领分片、受限并发地派发任务，途中回收已完成任务
    loop {
        // 回收已完成的任务，失败立即中止
        while let Some(joined) = join_set.try_join_next() {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((index, Err(e))) => {
                    warn!("分片 {} 上传失败: {}", index, e);
                    join_set.abort_all();
                    return Err(with_cancel_precedence(e, &token));
                }
                Err(join_err) => {
                    join_set.abort_all();
                    return Err(with_cancel_precedence(
                        UploadError::Transport(format!("分片任务异常退出: {}", join_err)),
                        &token,
                    ));
                }
            }
        }

        if token.is_cancelled() {
            join_set.abort_all();
            return Err(UploadError::Cancelled);
        }

        let chunk = { plan.lock().claim_next() };
        let Some(chunk) = chunk else { break };

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                // Semaphore 不会被关闭
                Err(_) => {
                    plan.lock().release(chunk.index);
                    join_set.abort_all();
                    return Err(UploadError::Transport("并发信号量已关闭".to_string()));
                }
            },
            _ = token.cancelled() => {
                plan.lock().release(chunk.index);
                join_set.abort_all();
                return Err(UploadError::Cancelled);
            }
        };

        let transport = transport.clone();
        let data = data.clone();
        let plan = plan.clone();
        let task = task.clone();
        let token = token.clone();
        let part_url = part_urls[chunk.index].clone();
        let content_type = content_type.clone();
        let max_attempts = options.multipart_max_attempts;

        join_set.spawn(async move {
            let _permit = permit;
            let index = chunk.index;
            let bytes = &data[chunk.range.start as usize..chunk.range.end as usize];

            let result = put_part_with_retry(
                &*transport,
                &part_url,
                bytes,
                &content_type,
                max_attempts,
                &token,
            )
            .await;

            if result.is_ok() {
                let committed = {
                    let mut plan = plan.lock();
                    plan.mark_completed(index);
                    plan.committed_bytes()
                };
                task.set_progress(committed as f64 / total as f64);
            }
            (index, result)
        });
    }

    // 等待全部在途分片
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((index, Err(e))) => {
                warn!("分片 {} 上传失败: {}", index, e);
                join_set.abort_all();
                return Err(with_cancel_precedence(e, &token));
            }
            Err(join_err) => {
                join_set.abort_all();
                return Err(with_cancel_precedence(
                    UploadError::Transport(format!("分片任务异常退出: {}", join_err)),
                    &token,
                ));
            }
        }
    }

    token.ensure_active()?;
    debug_assert!(plan.lock().is_completed());
    info!("全部分片完成，请求合并: {}", uuid);

    let merged = retry_if_throttled(
        || endpoints::multipart_complete(&*transport, &options, &uuid),
        options.retry_throttled_request_max_times,
        &token,
    )
    .await?;

    task.emit_uploaded(&uuid);

    if merged.is_ready {
        return Ok(merged);
    }
    poll_until_ready(&*transport, &options, &task, &uuid).await
}
