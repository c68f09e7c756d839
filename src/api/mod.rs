// 上传服务 API 模块
//
// transport 定义抽象 HTTP 能力，client 是 reqwest 生产实现，
// endpoints 封装各上传端点，types 对应服务端 JSON 形状。

pub mod client;
pub mod endpoints;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::HttpTransport;
pub use transport::{ApiRequest, ApiResponse, FormField, Method, RequestBody, Transport};
pub use types::{
    BaseUploadResponse, ErrorEnvelope, ErrorPayload, FileInfo, FromUrlResponse, GroupInfo,
    ImportStatus, MultipartStartResponse,
};
