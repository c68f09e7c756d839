// 上传 API 数据类型
//
// 与服务端 JSON 响应一一对应。核心逻辑只读取 uuid / is_ready 两个
// 字段，其余字段原样透传给调用方。

use serde::{Deserialize, Serialize};

/// 文件信息
///
/// 由服务端创建的权威表示，本地不做任何加工。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 文件 UUID
    pub uuid: String,

    /// 文件 ID（与 uuid 一致，部分接口返回）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,

    /// 文件大小（字节）
    #[serde(default)]
    pub size: u64,

    /// 服务端处理完成标志
    #[serde(default)]
    pub is_ready: bool,

    /// 是否已持久存储
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stored: Option<bool>,

    /// 是否为图片
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,

    /// 原始文件名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    /// 处理后文件名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// MIME 类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// 已接收字节数（处理中的文件）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<u64>,

    /// 总字节数（处理中的文件）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl FileInfo {
    /// 构建 CDN 访问地址: {base_cdn}/{uuid}/
    pub fn cdn_url(&self, base_cdn: &str) -> String {
        format!("{}/{}/", base_cdn.trim_end_matches('/'), self.uuid)
    }
}

/// 文件组信息
///
/// 全部成员上传完成后由服务端一次性创建。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    /// 组 ID，形如 "{uuid}~{N}"
    pub id: String,

    /// 创建时间（ISO 8601，原样透传）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_created: Option<String>,

    /// 组内文件数
    #[serde(default)]
    pub files_count: u64,

    /// 组的 CDN 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,

    /// 按请求顺序排列的成员文件
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

/// URL 导入的当前状态
///
/// 瞬时值：每条新通知都会取代上一条。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ImportStatus {
    /// 服务端尚未开始抓取
    Waiting,
    /// 抓取进行中
    Progress {
        /// 已抓取字节数
        #[serde(default)]
        done: u64,
        /// 总字节数
        #[serde(default)]
        total: u64,
    },
    /// 抓取成功，携带完整文件信息
    Success(FileInfo),
    /// 抓取失败
    Error {
        /// 服务端错误描述
        #[serde(default)]
        error: String,
    },
    /// 未知 token 或状态已过期
    Unknown,
}

impl ImportStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Success(_) | ImportStatus::Error { .. })
    }
}

/// /from_url/ 响应
///
/// 重复 URL 且开启查重时服务端直接返回既有文件信息，
/// 否则返回用于追踪的 token。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromUrlResponse {
    /// 抓取任务已受理
    Token {
        /// 追踪 token
        token: String,
    },
    /// 重复 URL，直接命中既有文件
    FileInfo(FileInfo),
}

/// /multipart/start/ 响应
#[derive(Debug, Clone, Deserialize)]
pub struct MultipartStartResponse {
    /// 会话对应的文件 UUID
    pub uuid: String,
    /// 预签名分片地址，按分片索引排列
    pub parts: Vec<String>,
}

/// /base/ 直传响应
#[derive(Debug, Clone, Deserialize)]
pub struct BaseUploadResponse {
    /// 新文件 UUID
    pub file: String,
}

/// 服务端错误载荷（jsonerrors=1 格式）
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

/// 错误内容
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    /// 错误描述
    #[serde(default)]
    pub content: String,
    /// 服务端状态码（可能与 HTTP 状态不同）
    #[serde(default)]
    pub status_code: Option<u16>,
}
