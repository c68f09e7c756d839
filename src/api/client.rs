// reqwest 传输实现
//
// Transport trait 的生产实现。只负责把 ApiRequest 翻译成
// reqwest 调用并原样带回状态码 / 响应体 / Retry-After，
// 不做任何业务分类。

use crate::api::transport::{ApiRequest, ApiResponse, FormField, Method, RequestBody, Transport};
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// 默认请求超时
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// HTTP 传输
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 创建传输（默认 60 秒超时）
    pub fn new() -> UploadResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// 创建指定超时的传输
    pub fn with_timeout(timeout: Duration) -> UploadResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Transport(format!("HTTP 客户端初始化失败: {}", e)))?;
        Ok(Self { client })
    }

    /// 由 reqwest 响应构造 ApiResponse
    async fn into_api_response(response: reqwest::Response) -> UploadResult<ApiResponse> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, req: ApiRequest) -> UploadResult<ApiResponse> {
        let url = req.url();
        debug!("{:?} {} ({} 个查询参数)", req.method, url, req.query.len());

        let mut builder = match req.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        builder = builder.query(&req.query);
        for (key, value) in &req.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if let RequestBody::Form(fields) = req.body {
            let mut form = multipart::Form::new();
            for (name, field) in fields {
                form = match field {
                    FormField::Text(value) => form.text(name, value),
                    FormField::File {
                        data,
                        file_name,
                        content_type,
                    } => {
                        let part = multipart::Part::bytes(data)
                            .file_name(file_name)
                            .mime_str(&content_type)
                            .map_err(|e| {
                                UploadError::Transport(format!("非法的内容类型: {}", e))
                            })?;
                        form.part(name, part)
                    }
                };
            }
            builder = builder.multipart(form);
        }

        let response = builder.send().await?;
        Self::into_api_response(response).await
    }

    async fn put_part(
        &self,
        url: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> UploadResult<ApiResponse> {
        debug!("PUT {} ({} bytes)", url, data.len());

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        Self::into_api_response(response).await
    }
}
