// 上传任务句柄
//
// 代表一次逻辑上传：进度、取消状态、生命周期回调。
// 进度比例保证单调不减；settle 守卫保证任务恰好被解决一次，
// 用于推送/轮询/取消三路竞争的唯一胜者裁决。
//
// 回调触发语义：
// - on_progress: 零次或多次
// - on_uploaded: 至多一次（服务端已接收，携带 uuid）
// - on_ready:    至多一次（服务端处理完成）
// - on_cancel:   至多一次

use crate::api::FileInfo;
use crate::cancel::CancelToken;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 进度回调（可重复触发）
type ProgressListener = Box<dyn Fn(f64) + Send + Sync>;
/// 一次性回调
type UploadedListener = Box<dyn FnOnce(&str) + Send>;
type ReadyListener = Box<dyn FnOnce(&FileInfo) + Send>;

/// 上传任务
///
/// 由创建方独占持有，解决或取消后即销毁。
/// 组上传场景下，所有子任务共享组的取消令牌。
pub struct UploadTask {
    /// 任务ID
    id: String,
    /// 创建时间 (Unix timestamp)
    created_at: i64,
    /// 取消令牌
    cancel: CancelToken,
    /// 进度比例 [0, 1]
    progress: Mutex<f64>,
    /// 是否已解决（settle-once 守卫）
    settled: AtomicBool,
    /// 进度回调
    on_progress: Mutex<Option<ProgressListener>>,
    /// 上传完成回调（服务端已接收）
    on_uploaded: Mutex<Option<UploadedListener>>,
    /// 就绪回调（服务端处理完成）
    on_ready: Mutex<Option<ReadyListener>>,
}

impl UploadTask {
    /// 创建新任务（独立取消令牌）
    pub fn new() -> Arc<Self> {
        Self::with_cancel_token(CancelToken::new())
    }

    /// 创建共享取消令牌的任务
    pub fn with_cancel_token(cancel: CancelToken) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            cancel,
            progress: Mutex::new(0.0),
            settled: AtomicBool::new(false),
            on_progress: Mutex::new(None),
            on_uploaded: Mutex::new(None),
            on_ready: Mutex::new(None),
        })
    }

    /// 任务ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 创建时间 (Unix timestamp)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// 取消令牌
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// 触发取消
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 当前进度比例 [0, 1]
    pub fn progress(&self) -> f64 {
        *self.progress.lock()
    }

    /// 更新进度
    ///
    /// 比例被钳制到 [0, 1]，且永不回退；发生前移时触发 on_progress。
    pub fn set_progress(&self, ratio: f64) {
        let ratio = ratio.clamp(0.0, 1.0);
        let advanced = {
            let mut current = self.progress.lock();
            if ratio > *current {
                *current = ratio;
                true
            } else {
                false
            }
        };

        if advanced {
            if let Some(listener) = self.on_progress.lock().as_ref() {
                listener(ratio);
            }
        }
    }

    /// 注册进度回调
    pub fn on_progress(&self, f: impl Fn(f64) + Send + Sync + 'static) {
        *self.on_progress.lock() = Some(Box::new(f));
    }

    /// 注册上传完成回调
    pub fn on_uploaded(&self, f: impl FnOnce(&str) + Send + 'static) {
        *self.on_uploaded.lock() = Some(Box::new(f));
    }

    /// 注册就绪回调
    pub fn on_ready(&self, f: impl FnOnce(&FileInfo) + Send + 'static) {
        *self.on_ready.lock() = Some(Box::new(f));
    }

    /// 注册取消回调
    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        self.cancel.on_cancel(f);
    }

    /// 触发上传完成回调（至多一次）
    pub fn emit_uploaded(&self, file_uuid: &str) {
        if let Some(listener) = self.on_uploaded.lock().take() {
            listener(file_uuid);
        }
    }

    /// 触发就绪回调（至多一次）
    pub fn emit_ready(&self, info: &FileInfo) {
        if let Some(listener) = self.on_ready.lock().take() {
            listener(info);
        }
    }

    /// 尝试解决任务（settle-once）
    ///
    /// 返回 true 表示本次调用是唯一胜者；推送、轮询、取消三路
    /// 终态竞争时，只有拿到 true 的一方允许落定结果，其余为 no-op。
    pub fn try_settle(&self) -> bool {
        let won = self
            .settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !won {
            debug!("任务 {} 已被解决，忽略后续落定", self.id);
        }
        won
    }

    /// 是否已解决
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}
