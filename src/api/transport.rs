// 抽象传输能力
//
// 核心逻辑不直接持有 HTTP 客户端，只面向 Transport trait 发请求。
// 生产实现见 client.rs（reqwest），测试实现见 testing.rs（脚本化应答）。

use crate::error::UploadResult;
use async_trait::async_trait;
use std::time::Duration;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// 表单字段
#[derive(Debug, Clone)]
pub enum FormField {
    /// 普通文本字段
    Text(String),
    /// 文件字段
    File {
        data: Vec<u8>,
        file_name: String,
        content_type: String,
    },
}

/// 请求体
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// 无请求体
    Empty,
    /// multipart/form-data 表单
    Form(Vec<(String, FormField)>),
}

/// 发往上传服务的请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// 服务地址（如 https://upload.uploadcare.com）
    pub base_url: String,
    /// 路径（如 /base/）
    pub path: String,
    /// 查询参数
    pub query: Vec<(String, String)>,
    /// 额外请求头
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    /// 构建 GET 请求
    pub fn get(base_url: &str, path: &str) -> Self {
        Self {
            method: Method::Get,
            base_url: base_url.to_string(),
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// 构建 POST 请求
    pub fn post(base_url: &str, path: &str) -> Self {
        Self {
            method: Method::Post,
            base_url: base_url.to_string(),
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// 追加查询参数
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// 追加可选查询参数（None 时忽略）
    pub fn query_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// 追加请求头
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    /// 设置表单请求体
    pub fn form(mut self, fields: Vec<(String, FormField)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    /// 完整请求地址（不含查询串）
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// 服务响应
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 响应体
    pub body: Vec<u8>,
    /// Retry-After 头（限流时服务端指示的等待时间）
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    /// 是否为 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 响应体文本
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 抽象 HTTP 能力
///
/// 核心对传输层的全部要求：结构化 API 请求与到预签名地址的
/// 分片直传。实现方不做限流分类，由 endpoints 层统一处理。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一个 API 请求
    async fn request(&self, req: ApiRequest) -> UploadResult<ApiResponse>;

    /// PUT 分片原始字节到预签名地址
    async fn put_part(
        &self,
        url: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> UploadResult<ApiResponse>;
}
