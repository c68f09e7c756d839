// 上传错误类型
//
// 所有公开接口统一返回 UploadResult，调用方可以对错误分类做精确匹配：
// - Cancelled 一旦被观察到，优先级高于任何在途网络错误
// - Throttled 在内部按配置重试，重试耗尽后才向上抛出
// - Validation 在发起任何网络请求之前失败

use std::time::Duration;

/// 上传结果类型别名
pub type UploadResult<T> = Result<T, UploadError>;

/// 上传错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// 用户主动取消
    Cancelled,
    /// 服务端限流（HTTP 429），携带服务端指示的等待时间
    Throttled {
        /// 重试前应等待的时间
        retry_after: Duration,
    },
    /// 参数校验失败（不支持的输入类型、缺少必填配置等）
    Validation(String),
    /// 服务端返回的业务错误（非 2xx 或错误载荷）
    Service { status: u16, message: String },
    /// 连接级传输错误
    Transport(String),
}

impl UploadError {
    /// 是否为取消错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// 是否为限流错误
    pub fn is_throttled(&self) -> bool {
        matches!(self, UploadError::Throttled { .. })
    }

    /// 构造服务端错误
    pub fn service(status: u16, message: impl Into<String>) -> Self {
        UploadError::Service {
            status,
            message: message.into(),
        }
    }

    /// 构造参数校验错误
    pub fn validation(message: impl Into<String>) -> Self {
        UploadError::Validation(message.into())
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Cancelled => write!(f, "上传已取消"),
            UploadError::Throttled { retry_after } => {
                write!(f, "请求被限流，{} 秒后可重试", retry_after.as_secs())
            }
            UploadError::Validation(msg) => write!(f, "参数校验失败: {}", msg),
            UploadError::Service { status, message } => {
                write!(f, "[{}] {}", status, message)
            }
            UploadError::Transport(msg) => write!(f, "传输错误: {}", msg),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(e: serde_json::Error) -> Self {
        UploadError::Transport(format!("响应解析失败: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(UploadError::Cancelled.is_cancelled());
        assert!(!UploadError::Cancelled.is_throttled());

        let throttled = UploadError::Throttled {
            retry_after: Duration::from_secs(10),
        };
        assert!(throttled.is_throttled());
        assert!(!throttled.is_cancelled());

        assert!(!UploadError::service(400, "bad request").is_throttled());
    }

    #[test]
    fn test_error_display() {
        let e = UploadError::service(403, "pub_key is invalid");
        assert_eq!(e.to_string(), "[403] pub_key is invalid");

        let e = UploadError::validation("publicKey 不能为空");
        assert!(e.to_string().contains("publicKey"));
    }
}
