// 取消令牌
//
// 在 tokio_util 的 CancellationToken 之上补充监听器列表：
// - cancel() 幂等，终态不可逆
// - on_cancel 注册的回调至多触发一次；若已取消则立即触发
// - 注册与取消的竞争采用"注册后再检查"模式，持锁判断终态，
//   保证不会漏掉恰好与订阅竞争的取消信号
//
// 所有组件在每个挂起点前后都必须调用 ensure_active()

use crate::error::{UploadError, UploadResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 取消回调
type CancelListener = Box<dyn FnOnce() + Send>;

/// 共享状态
struct CancelState {
    /// 待触发的监听器；取消后置为 None，后续注册立即触发
    listeners: Mutex<Option<Vec<CancelListener>>>,
}

/// 取消令牌
///
/// 克隆后共享同一份取消状态。组上传协调器与其所有子任务
/// 共享同一个令牌：取消组即取消全部子任务。
#[derive(Clone)]
pub struct CancelToken {
    inner: CancellationToken,
    state: Arc<CancelState>,
}

impl CancelToken {
    /// 创建新的取消令牌
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
            state: Arc::new(CancelState {
                listeners: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    /// 触发取消（幂等）
    ///
    /// 第一次调用排空监听器列表并依次触发；之后的调用不做任何事。
    pub fn cancel(&self) {
        // 先持锁取走监听器，保证与 on_cancel 的竞争只有一个胜者
        let listeners = self.state.listeners.lock().take();
        self.inner.cancel();

        if let Some(listeners) = listeners {
            for listener in listeners {
                listener();
            }
        }
    }

    /// 是否已取消（纯读）
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// 注册取消回调
    ///
    /// 若令牌已处于取消态，回调立即触发（同步执行）。
    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        let mut guard = self.state.listeners.lock();
        match guard.as_mut() {
            Some(listeners) => listeners.push(Box::new(f)),
            // 列表已被 cancel() 取走，说明已取消
            None => {
                drop(guard);
                f();
            }
        }
    }

    /// 等待取消信号（供 tokio::select! 使用）
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// 检查取消状态，已取消则返回 CancelError
    ///
    /// 每个网络请求、定时等待、退避延迟的前后都应调用本方法。
    pub fn ensure_active(&self) -> UploadResult<()> {
        if self.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        // 回调至多触发一次
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_after_cancel_fires_immediately() {
        let token = CancelToken::new();
        token.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        token.on_cancel(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancelToken::new();
        let other = token.clone();

        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.ensure_active().is_err());
        assert_eq!(token.ensure_active().unwrap_err(), UploadError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let other = token.clone();

        let waiter = tokio::spawn(async move {
            other.cancelled().await;
            true
        });

        token.cancel();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_ensure_active_before_cancel() {
        let token = CancelToken::new();
        assert!(token.ensure_active().is_ok());
    }
}
