// 上传策略分发
//
// 统一入口：按输入来源与文件大小选择上传策略。
// - 内存字节 / 本地文件: 小于阈值走单次直传，否则分片上传
// - 远端 URL: 委托服务端抓取
// - 既有 UUID: 仅查询并等待就绪，不发生上传
// 来源分类与配置校验都在任何网络请求之前完成。

pub mod chunk;
pub mod direct;
pub mod from_url;
pub mod group;
pub mod multipart;

use crate::api::{FileInfo, GroupInfo, HttpTransport, Transport};
use crate::cancel::CancelToken;
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::pusher::{PushChannel, Pusher};
use crate::task::UploadTask;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// 取消优先：令牌已取消时统一归因为 Cancelled
pub(crate) fn with_cancel_precedence(error: UploadError, token: &CancelToken) -> UploadError {
    if token.is_cancelled() && !matches!(error, UploadError::Cancelled) {
        UploadError::Cancelled
    } else {
        error
    }
}

/// 上传来源
///
/// 显式标签代替运行时猜测：每种来源对应唯一一种处理策略。
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 内存中的完整文件内容
    Data {
        /// 文件字节
        bytes: Vec<u8>,
        /// 覆盖配置中的文件名
        file_name: Option<String>,
        /// 覆盖配置中的内容类型
        content_type: Option<String>,
    },
    /// 本地文件路径
    File(PathBuf),
    /// 远端 URL（仅 http/https）
    Url(String),
    /// 服务端既有文件的 UUID
    Uuid(String),
}

impl UploadSource {
    /// 内存字节来源
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data {
            bytes: bytes.into(),
            file_name: None,
            content_type: None,
        }
    }

    /// 带文件名与内容类型的内存字节来源
    pub fn named_data(
        bytes: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self::Data {
            bytes: bytes.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
        }
    }

    /// 本地文件来源
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// 远端 URL 来源
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// 既有文件 UUID 来源
    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self::Uuid(uuid.into())
    }

    /// 日志用途的来源类别名
    fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::File(_) => "file",
            Self::Url(_) => "url",
            Self::Uuid(_) => "uuid",
        }
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::data(bytes)
    }
}

impl From<&[u8]> for UploadSource {
    fn from(bytes: &[u8]) -> Self {
        Self::data(bytes.to_vec())
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// 来源携带覆盖项时合成生效配置
fn merge_overrides(
    options: &Arc<UploadOptions>,
    file_name: Option<String>,
    content_type: Option<String>,
) -> Arc<UploadOptions> {
    if file_name.is_none() && content_type.is_none() {
        return options.clone();
    }
    let mut merged = (**options).clone();
    if file_name.is_some() {
        merged.file_name = file_name;
    }
    if content_type.is_some() {
        merged.content_type = content_type;
    }
    Arc::new(merged)
}

/// 按大小阈值选择直传或分片
async fn upload_bytes(
    transport: Arc<dyn Transport>,
    options: Arc<UploadOptions>,
    task: Arc<UploadTask>,
    bytes: Vec<u8>,
) -> UploadResult<FileInfo> {
    if bytes.len() as u64 >= options.multipart_min_file_size {
        multipart::upload_multipart(transport, options, task, Arc::new(bytes)).await
    } else {
        direct::upload_direct(
            &*transport,
            &options,
            &task,
            bytes,
            options.effective_file_name(),
            options.effective_content_type(),
        )
        .await
    }
}

/// 单文件上传调度
///
/// 配置校验与来源分类先于任何网络请求；成功路径统一负责
/// 终态进度与 on_ready 触发；取消在错误归因中优先。
pub(crate) async fn dispatch_upload(
    transport: Arc<dyn Transport>,
    push: Option<Arc<dyn PushChannel>>,
    options: Arc<UploadOptions>,
    task: Arc<UploadTask>,
    source: UploadSource,
) -> UploadResult<FileInfo> {
    options.validate()?;
    let token = task.cancel_token().clone();

    debug!("上传任务 {} 开始: 来源类型 {}", task.id(), source.kind());

    let result = match source {
        UploadSource::Data {
            bytes,
            file_name,
            content_type,
        } => {
            let options = merge_overrides(&options, file_name, content_type);
            upload_bytes(transport, options, task.clone(), bytes).await
        }
        UploadSource::File(path) => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let options = if options.file_name.is_none() {
                        merge_overrides(&options, file_name, None)
                    } else {
                        options
                    };
                    upload_bytes(transport, options, task.clone(), bytes).await
                }
                Err(e) => Err(UploadError::validation(format!(
                    "无法读取文件 {}: {}",
                    path.display(),
                    e
                ))),
            }
        }
        UploadSource::Url(url) => {
            from_url::upload_from_url(&*transport, push.as_ref(), &options, &task, &url).await
        }
        UploadSource::Uuid(file_uuid) => {
            if uuid::Uuid::parse_str(&file_uuid).is_err() {
                Err(UploadError::validation(format!(
                    "无效的文件 UUID: {}",
                    file_uuid
                )))
            } else {
                task.emit_uploaded(&file_uuid);
                direct::poll_until_ready(&*transport, &options, &task, &file_uuid).await
            }
        }
    };

    match result {
        Ok(info) => {
            task.set_progress(1.0);
            task.emit_ready(&info);
            debug!("上传任务 {} 完成: {}", task.id(), info.uuid);
            Ok(info)
        }
        Err(e) => Err(with_cancel_precedence(e, &token)),
    }
}

/// 在当前任务上等待完成的单文件上传
///
/// 不另起后台任务的形态；需要可分离句柄时用 [`Uploader::upload`]。
pub async fn upload_file(
    transport: Arc<dyn Transport>,
    push: Option<Arc<dyn PushChannel>>,
    options: UploadOptions,
    task: Arc<UploadTask>,
    source: impl Into<UploadSource>,
) -> UploadResult<FileInfo> {
    dispatch_upload(transport, push, Arc::new(options), task, source.into()).await
}

/// 单文件上传句柄
pub struct UploadJob {
    task: Arc<UploadTask>,
    handle: JoinHandle<UploadResult<FileInfo>>,
}

impl UploadJob {
    /// 任务句柄（注册回调、查询进度）
    pub fn task(&self) -> &Arc<UploadTask> {
        &self.task
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// 等待上传结束
    pub async fn wait(self) -> UploadResult<FileInfo> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => Err(UploadError::Transport(format!("上传任务异常退出: {}", e))),
        }
    }
}

/// 文件组上传句柄
pub struct GroupJob {
    task: Arc<UploadTask>,
    handle: JoinHandle<UploadResult<GroupInfo>>,
}

impl GroupJob {
    /// 组任务句柄（整组进度与取消）
    pub fn task(&self) -> &Arc<UploadTask> {
        &self.task
    }

    /// 取消整组（含所有子上传）
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// 等待组上传结束
    pub async fn wait(self) -> UploadResult<GroupInfo> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => Err(UploadError::Transport(format!("组任务异常退出: {}", e))),
        }
    }
}

/// 上传客户端
///
/// 持有传输与推送通道的共享引用，可克隆后跨任务使用。
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    push: Option<Arc<dyn PushChannel>>,
    options: Arc<UploadOptions>,
}

impl Uploader {
    /// 使用生产组件创建客户端
    pub fn new(options: UploadOptions) -> UploadResult<Self> {
        options.validate()?;
        let pusher = match &options.pusher_key {
            Some(key) => Pusher::with_key(key),
            None => Pusher::new(),
        };
        Ok(Self {
            transport: Arc::new(HttpTransport::new()?),
            push: Some(Arc::new(pusher)),
            options: Arc::new(options),
        })
    }

    /// 注入自定义传输与推送通道（测试或特殊部署环境）
    pub fn with_components(
        options: UploadOptions,
        transport: Arc<dyn Transport>,
        push: Option<Arc<dyn PushChannel>>,
    ) -> Self {
        Self {
            transport,
            push,
            options: Arc::new(options),
        }
    }

    /// 当前生效配置
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// 发起单文件上传
    pub fn upload(&self, source: impl Into<UploadSource>) -> UploadJob {
        self.upload_with_task(source, UploadTask::new())
    }

    /// 使用外部创建的任务句柄发起上传
    ///
    /// 任务在 spawn 前即可注册回调，保证不漏早期事件。
    pub fn upload_with_task(
        &self,
        source: impl Into<UploadSource>,
        task: Arc<UploadTask>,
    ) -> UploadJob {
        let handle = tokio::spawn(dispatch_upload(
            self.transport.clone(),
            self.push.clone(),
            self.options.clone(),
            task.clone(),
            source.into(),
        ));
        UploadJob { task, handle }
    }

    /// 发起文件组上传
    pub fn upload_group(&self, sources: Vec<UploadSource>) -> GroupJob {
        self.upload_group_with_task(sources, UploadTask::new())
    }

    /// 使用外部创建的任务句柄发起组上传
    pub fn upload_group_with_task(
        &self,
        sources: Vec<UploadSource>,
        task: Arc<UploadTask>,
    ) -> GroupJob {
        let handle = tokio::spawn(group::upload_group(
            self.transport.clone(),
            self.push.clone(),
            self.options.clone(),
            task.clone(),
            sources,
        ));
        GroupJob { task, handle }
    }
}
