// 限流重试包装
//
// 对单个异步操作做"被限流就等待后重试"的封装：
// - 仅 Throttled 错误触发重试，其余错误立即向上传播
// - 等待时间优先采用服务端指示（Retry-After），缺省使用配置默认值
// - 重试次数有上限，耗尽后抛出最后一次限流错误
// - 退避等待期间观察取消令牌，取消立即中止

use crate::cancel::CancelToken;
use crate::error::{UploadError, UploadResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 默认最大尝试次数（首次调用 + 重试）
pub const DEFAULT_RETRY_THROTTLED_MAX_TIMES: usize = 5;

/// 服务端未指示等待时间时的默认退避
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(15);

/// 执行操作，被限流时自动退避重试
///
/// # 参数
/// * `op` - 每次尝试调用一次，产生一个异步操作
/// * `max_attempts` - 最大尝试次数（含首次），至少为 1
/// * `token` - 取消令牌，退避期间被取消立即返回 CancelError
pub async fn retry_if_throttled<T, F, Fut>(
    mut op: F,
    max_attempts: usize,
    token: &CancelToken,
) -> UploadResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = UploadResult<T>>,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        token.ensure_active()?;

        match op().await {
            Ok(value) => return Ok(value),
            Err(UploadError::Throttled { retry_after }) => {
                if attempt == max_attempts {
                    warn!("限流重试耗尽，共尝试 {} 次", max_attempts);
                    return Err(UploadError::Throttled { retry_after });
                }

                debug!(
                    "请求被限流，等待 {}ms 后重试 ({}/{})",
                    retry_after.as_millis(),
                    attempt,
                    max_attempts
                );

                tokio::select! {
                    _ = tokio::time::sleep(retry_after) => {}
                    _ = token.cancelled() => return Err(UploadError::Cancelled),
                }
            }
            // 非限流错误不重试
            Err(e) => return Err(e),
        }
    }

    unreachable!("重试循环必定在上限内返回")
}
