// 文件组上传
//
// 并发上传全部成员后用成员 uuid 调 /group/ 建组。
// - 所有子上传共享组的取消令牌：取消组即取消全部子任务
// - 任一子上传失败立即取消其余成员并使整组失败，不建组
// - 组进度 = 已成功子任务数 / 总数，随成员完成递增、永不回退；
//   最后一个成员成功时即达 1.0（建组请求本身不计入进度）

use crate::api::endpoints;
use crate::api::{GroupInfo, Transport};
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::pusher::PushChannel;
use crate::retry::retry_if_throttled;
use crate::task::UploadTask;
use crate::uploader::{dispatch_upload, UploadSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 组上传入口
pub(crate) async fn upload_group(
    transport: Arc<dyn Transport>,
    push: Option<Arc<dyn PushChannel>>,
    options: Arc<UploadOptions>,
    group_task: Arc<UploadTask>,
    sources: Vec<UploadSource>,
) -> UploadResult<GroupInfo> {
    options.validate()?;
    if sources.is_empty() {
        return Err(UploadError::validation("文件组不能为空"));
    }

    let token = group_task.cancel_token().clone();
    token.ensure_active()?;

    let total = sources.len();
    debug!("组上传开始: {} 个成员", total);

    let succeeded = Arc::new(AtomicUsize::new(0));
    let mut join_set: JoinSet<(usize, UploadResult<String>)> = JoinSet::new();

    for (index, source) in sources.into_iter().enumerate() {
        let child = UploadTask::with_cancel_token(token.clone());
        let transport = transport.clone();
        let push = push.clone();
        let options = options.clone();
        let group_task = group_task.clone();
        let succeeded = succeeded.clone();

        join_set.spawn(async move {
            let result = dispatch_upload(transport, push, options, child, source)
                .await
                .map(|info| info.uuid);
            if result.is_ok() {
                let done = succeeded.fetch_add(1, Ordering::SeqCst) + 1;
                group_task.set_progress(done as f64 / total as f64);
            }
            (index, result)
        });
    }

    let mut uuids: Vec<Option<String>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, Ok(uuid))) => uuids[index] = Some(uuid),
            Ok((index, Err(e))) => {
                let user_cancelled = token.is_cancelled();
                warn!("组成员 {} 失败: {}", index, e);
                // 立即取消其余成员，不建组
                token.cancel();
                join_set.abort_all();
                return Err(if user_cancelled || matches!(e, UploadError::Cancelled) {
                    UploadError::Cancelled
                } else {
                    e
                });
            }
            Err(join_err) => {
                let user_cancelled = token.is_cancelled();
                token.cancel();
                join_set.abort_all();
                return Err(if user_cancelled {
                    UploadError::Cancelled
                } else {
                    UploadError::Transport(format!("组成员任务异常退出: {}", join_err))
                });
            }
        }
    }

    token.ensure_active()?;

    let uuids: Vec<String> = uuids
        .into_iter()
        .map(|u| u.ok_or_else(|| UploadError::Transport("组成员结果缺失".to_string())))
        .collect::<UploadResult<_>>()?;

    let group = retry_if_throttled(
        || endpoints::create_group(&*transport, &options, &uuids),
        options.retry_throttled_request_max_times,
        &token,
    )
    .await?;

    group_task.set_progress(1.0);
    info!("文件组创建完成: {} ({} 个成员)", group.id, total);
    Ok(group)
}
