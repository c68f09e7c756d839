// 测试用传输实现
//
// 按路径预置响应脚本，并记录全部请求，供单元测试断言
// "请求是否发出 / 携带了哪些参数"。每个路径的最后一条响应会被
// 重复返回，方便轮询类测试收敛。

use crate::api::transport::{ApiRequest, ApiResponse, FormField, RequestBody, Transport};
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// 脚本化传输
pub struct MockTransport {
    /// 路径 -> 预置响应队列
    responses: Mutex<HashMap<String, VecDeque<UploadResult<ApiResponse>>>>,
    /// 分片 PUT 的预置响应队列
    part_responses: Mutex<VecDeque<UploadResult<ApiResponse>>>,
    /// 已收到的 API 请求
    requests: Mutex<Vec<ApiRequest>>,
    /// 已收到的分片请求 (url, 字节数)
    part_requests: Mutex<Vec<(String, usize)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            part_responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            part_requests: Mutex::new(Vec::new()),
        }
    }

    /// 预置一条 JSON 响应
    pub fn enqueue_json(&self, path: &str, status: u16, body: &str) {
        self.enqueue(
            path,
            Ok(ApiResponse {
                status,
                body: body.as_bytes().to_vec(),
                retry_after: None,
            }),
        );
    }

    /// 预置一条 429 限流响应
    pub fn enqueue_throttled(&self, path: &str, retry_after: Duration) {
        self.enqueue(
            path,
            Ok(ApiResponse {
                status: 429,
                body: Vec::new(),
                retry_after: Some(retry_after),
            }),
        );
    }

    /// 预置一条传输层错误
    pub fn enqueue_error(&self, path: &str, error: UploadError) {
        self.enqueue(path, Err(error));
    }

    fn enqueue(&self, path: &str, result: UploadResult<ApiResponse>) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    /// 预置一条分片 PUT 成功响应
    pub fn enqueue_part_ok(&self) {
        self.part_responses.lock().push_back(Ok(ApiResponse {
            status: 200,
            body: Vec::new(),
            retry_after: None,
        }));
    }

    /// 预置一条分片 PUT 失败响应
    pub fn enqueue_part_error(&self, error: UploadError) {
        self.part_responses.lock().push_back(Err(error));
    }

    /// 预置一条分片 PUT 限流响应
    pub fn enqueue_part_throttled(&self, retry_after: Duration) {
        self.part_responses.lock().push_back(Ok(ApiResponse {
            status: 429,
            body: Vec::new(),
            retry_after: Some(retry_after),
        }));
    }

    /// 全部已收到的 API 请求
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// 指定路径收到的请求数
    pub fn request_count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }

    /// 指定路径第一条请求的文本表单字段
    pub fn form_fields(&self, path: &str) -> Vec<(String, String)> {
        self.requests
            .lock()
            .iter()
            .find(|r| r.path == path)
            .map(|r| match &r.body {
                RequestBody::Form(fields) => fields
                    .iter()
                    .filter_map(|(name, field)| match field {
                        FormField::Text(value) => Some((name.clone(), value.clone())),
                        FormField::File { .. } => None,
                    })
                    .collect(),
                RequestBody::Empty => Vec::new(),
            })
            .unwrap_or_default()
    }

    /// 全部已收到的分片请求
    pub fn part_requests(&self) -> Vec<(String, usize)> {
        self.part_requests.lock().clone()
    }

    /// 取出一条响应；队列只剩最后一条时重复返回该条
    fn next_response(
        queue: &mut VecDeque<UploadResult<ApiResponse>>,
    ) -> Option<UploadResult<ApiResponse>> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, req: ApiRequest) -> UploadResult<ApiResponse> {
        // 先尝试"路径?参数=值"形式的精确路由，再退回裸路径。
        // 精确路由用于多个并发请求命中同一路径但参数不同的场景。
        let mut keys: Vec<String> = req
            .query
            .iter()
            .map(|(k, v)| format!("{}?{}={}", req.path, k, v))
            .collect();
        keys.push(req.path.clone());
        self.requests.lock().push(req);

        let mut responses = self.responses.lock();
        for key in &keys {
            if let Some(queue) = responses.get_mut(key) {
                if let Some(result) = Self::next_response(queue) {
                    return result;
                }
            }
        }
        Err(UploadError::Transport(format!(
            "mock 未预置响应: {}",
            keys.last().cloned().unwrap_or_default()
        )))
    }

    async fn put_part(
        &self,
        url: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> UploadResult<ApiResponse> {
        self.part_requests.lock().push((url.to_string(), data.len()));

        let mut queue = self.part_responses.lock();
        match Self::next_response(&mut queue) {
            Some(result) => result,
            None => Err(UploadError::Transport("mock 未预置分片响应".to_string())),
        }
    }
}
