// Uploadcare Upload Rust Library
// Uploadcare 上传服务 Rust 客户端核心库

// 错误类型模块
pub mod error;

// 取消令牌模块
pub mod cancel;

// 限流重试模块
pub mod retry;

// 上传配置模块
pub mod config;

// 任务句柄模块
pub mod task;

// 上传服务API模块
pub mod api;

// 推送通知模块
pub mod pusher;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use api::{FileInfo, GroupInfo, HttpTransport, ImportStatus, Transport};
pub use cancel::CancelToken;
pub use config::UploadOptions;
pub use error::{UploadError, UploadResult};
pub use pusher::{PushChannel, Pusher};
pub use task::UploadTask;
pub use uploader::{upload_file, GroupJob, UploadJob, UploadSource, Uploader};
