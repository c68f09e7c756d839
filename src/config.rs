// 上传配置
//
// 统一的选项表面：所有上传路径共享一份 UploadOptions，
// 策略分发层只负责填充默认值，不做任何业务逻辑。

use crate::error::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认上传服务地址
pub const DEFAULT_BASE_URL: &str = "https://upload.uploadcare.com";

/// 默认 CDN 地址
pub const DEFAULT_BASE_CDN: &str = "https://ucarecdn.com";

/// 分片上传阈值: 25MB（小于该值的文件走单次直传）
pub const DEFAULT_MULTIPART_MIN_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// 默认分片大小: 5MB
pub const DEFAULT_MULTIPART_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 最小分片大小: 5MB（服务端强制要求）
pub const MIN_MULTIPART_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 默认单分片最大尝试次数
pub const DEFAULT_MULTIPART_MAX_ATTEMPTS: usize = 3;

/// 默认最大并发分片请求数
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// URL 导入状态轮询间隔（毫秒）
pub const DEFAULT_FROM_URL_POLL_INTERVAL_MS: u64 = 1000;

/// 就绪轮询间隔（毫秒）
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 500;

/// 就绪轮询最大次数
pub const DEFAULT_READY_POLL_MAX_ATTEMPTS: usize = 60;

/// 默认文件名（调用方未指定时）
pub const DEFAULT_FILE_NAME: &str = "original";

/// 默认内容类型
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_base_cdn() -> String {
    DEFAULT_BASE_CDN.to_string()
}

fn default_multipart_min_file_size() -> u64 {
    DEFAULT_MULTIPART_MIN_FILE_SIZE
}

fn default_multipart_chunk_size() -> u64 {
    DEFAULT_MULTIPART_CHUNK_SIZE
}

fn default_multipart_max_attempts() -> usize {
    DEFAULT_MULTIPART_MAX_ATTEMPTS
}

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_retry_throttled_max_times() -> usize {
    crate::retry::DEFAULT_RETRY_THROTTLED_MAX_TIMES
}

fn default_from_url_poll_interval_ms() -> u64 {
    DEFAULT_FROM_URL_POLL_INTERVAL_MS
}

fn default_ready_poll_interval_ms() -> u64 {
    DEFAULT_READY_POLL_INTERVAL_MS
}

fn default_ready_poll_max_attempts() -> usize {
    DEFAULT_READY_POLL_MAX_ATTEMPTS
}

/// 上传选项
///
/// 除 public_key 外均有默认值。各上传路径只读取与自己相关的字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    /// 项目公钥（必填）
    pub public_key: String,

    /// 上传后是否立即存储（None = 服务端 "auto"）
    #[serde(default)]
    pub store: Option<bool>,
    /// 文件名，缺省为 "original"
    #[serde(default)]
    pub file_name: Option<String>,
    /// 内容类型，缺省为 "application/octet-stream"
    #[serde(default)]
    pub content_type: Option<String>,

    /// 分片上传阈值（字节）
    #[serde(default = "default_multipart_min_file_size")]
    pub multipart_min_file_size: u64,
    /// 分片大小（字节），不得低于服务端最小值 5MB
    #[serde(default = "default_multipart_chunk_size")]
    pub multipart_chunk_size: u64,
    /// 单分片最大尝试次数
    #[serde(default = "default_multipart_max_attempts")]
    pub multipart_max_attempts: usize,
    /// 最大并发分片请求数
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// 限流重试最大尝试次数
    #[serde(default = "default_retry_throttled_max_times")]
    pub retry_throttled_request_max_times: usize,

    /// 上传服务地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// CDN 地址
    #[serde(default = "default_base_cdn")]
    pub base_cdn: String,

    /// Pusher 应用 key（None = 服务端公共 key）
    #[serde(default)]
    pub pusher_key: Option<String>,

    /// 上传来源标识（服务端统计用）
    #[serde(default)]
    pub source: Option<String>,
    /// 集成方标识（拼入 X-UC-User-Agent）
    #[serde(default)]
    pub integration: Option<String>,

    /// 安全签名（由调用方生成后透传）
    #[serde(default)]
    pub secure_signature: Option<String>,
    /// 签名过期时间（Unix 时间戳，透传）
    #[serde(default)]
    pub secure_expire: Option<String>,

    /// URL 导入：是否检查重复 URL
    #[serde(default)]
    pub check_for_url_duplicates: Option<bool>,
    /// URL 导入：是否保存 URL 供重复上传复用
    #[serde(default)]
    pub save_url_for_recurrent_uploads: Option<bool>,

    /// URL 导入状态轮询间隔（毫秒）
    #[serde(default = "default_from_url_poll_interval_ms")]
    pub from_url_poll_interval_ms: u64,
    /// 就绪轮询间隔（毫秒）
    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,
    /// 就绪轮询最大次数
    #[serde(default = "default_ready_poll_max_attempts")]
    pub ready_poll_max_attempts: usize,
}

impl UploadOptions {
    /// 使用默认配置创建选项
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            store: None,
            file_name: None,
            content_type: None,
            multipart_min_file_size: DEFAULT_MULTIPART_MIN_FILE_SIZE,
            multipart_chunk_size: DEFAULT_MULTIPART_CHUNK_SIZE,
            multipart_max_attempts: DEFAULT_MULTIPART_MAX_ATTEMPTS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry_throttled_request_max_times: crate::retry::DEFAULT_RETRY_THROTTLED_MAX_TIMES,
            base_url: DEFAULT_BASE_URL.to_string(),
            base_cdn: DEFAULT_BASE_CDN.to_string(),
            pusher_key: None,
            source: None,
            integration: None,
            secure_signature: None,
            secure_expire: None,
            check_for_url_duplicates: None,
            save_url_for_recurrent_uploads: None,
            from_url_poll_interval_ms: DEFAULT_FROM_URL_POLL_INTERVAL_MS,
            ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
            ready_poll_max_attempts: DEFAULT_READY_POLL_MAX_ATTEMPTS,
        }
    }

    /// 校验配置
    ///
    /// 校验失败的选项在发起任何网络请求之前报错。
    pub fn validate(&self) -> UploadResult<()> {
        if self.public_key.trim().is_empty() {
            return Err(UploadError::validation("public_key 不能为空"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(UploadError::validation("max_concurrent_requests 必须大于 0"));
        }
        if self.multipart_chunk_size < MIN_MULTIPART_CHUNK_SIZE {
            return Err(UploadError::validation(format!(
                "multipart_chunk_size 不得小于 {} 字节",
                MIN_MULTIPART_CHUNK_SIZE
            )));
        }
        if self.multipart_max_attempts == 0 {
            return Err(UploadError::validation("multipart_max_attempts 必须大于 0"));
        }
        Ok(())
    }

    /// 有效文件名
    pub fn effective_file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME)
    }

    /// 有效内容类型
    pub fn effective_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// store 参数的服务端表示: "auto" / "1" / "0"
    pub fn store_value(&self) -> &'static str {
        match self.store {
            None => "auto",
            Some(true) => "1",
            Some(false) => "0",
        }
    }

    /// URL 导入轮询间隔
    pub fn from_url_poll_interval(&self) -> Duration {
        Duration::from_millis(self.from_url_poll_interval_ms)
    }

    /// 就绪轮询间隔
    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    /// X-UC-User-Agent 请求头的值
    pub fn user_agent(&self) -> String {
        let base = format!(
            "UploadcareRust/{}/{}",
            env!("CARGO_PKG_VERSION"),
            self.public_key
        );
        match &self.integration {
            Some(integration) => format!("{} ({})", base, integration),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = UploadOptions::new("demopublickey");
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.base_cdn, DEFAULT_BASE_CDN);
        assert_eq!(options.multipart_chunk_size, 5 * 1024 * 1024);
        assert_eq!(options.multipart_min_file_size, 25 * 1024 * 1024);
        assert_eq!(options.max_concurrent_requests, 4);
        assert_eq!(options.effective_file_name(), "original");
        assert_eq!(options.effective_content_type(), "application/octet-stream");
        assert_eq!(options.pusher_key, None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_public_key() {
        let options = UploadOptions::new("  ");
        let err = options.validate().unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_small_chunk_size() {
        let mut options = UploadOptions::new("demopublickey");
        options.multipart_chunk_size = 1024;
        assert!(options.validate().is_err());

        options.multipart_chunk_size = MIN_MULTIPART_CHUNK_SIZE;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut options = UploadOptions::new("demopublickey");
        options.max_concurrent_requests = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_store_value() {
        let mut options = UploadOptions::new("demopublickey");
        assert_eq!(options.store_value(), "auto");
        options.store = Some(true);
        assert_eq!(options.store_value(), "1");
        options.store = Some(false);
        assert_eq!(options.store_value(), "0");
    }

    #[test]
    fn test_user_agent_with_integration() {
        let mut options = UploadOptions::new("demopublickey");
        assert!(options.user_agent().contains("demopublickey"));

        options.integration = Some("MyApp/1.0".to_string());
        let ua = options.user_agent();
        assert!(ua.contains("demopublickey"));
        assert!(ua.ends_with("(MyApp/1.0)"));
    }
}
