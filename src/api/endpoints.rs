// 上传服务接口封装
//
// 每个函数对应一个服务端点：组装表单、发请求、解析响应。
// 错误映射统一在这里完成：
// - HTTP 429 或载荷 status_code=429 → Throttled（携带 Retry-After）
// - jsonerrors=1 错误载荷 / 非 2xx → Service
// 限流重试由调用方用 retry::retry_if_throttled 包装，这里不重试。

use crate::api::transport::{ApiRequest, ApiResponse, FormField, Transport};
use crate::api::types::{
    BaseUploadResponse, ErrorEnvelope, FileInfo, FromUrlResponse, GroupInfo, ImportStatus,
    MultipartStartResponse,
};
use crate::config::UploadOptions;
use crate::error::{UploadError, UploadResult};
use crate::retry::DEFAULT_RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::debug;

/// 限流状态码
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// 检查响应并映射错误
///
/// jsonerrors=1 模式下服务端可能以 200 返回错误载荷，
/// 因此成功状态也要先探测 error 信封。
fn check_response(resp: ApiResponse) -> UploadResult<Vec<u8>> {
    if resp.status == STATUS_TOO_MANY_REQUESTS {
        return Err(UploadError::Throttled {
            retry_after: resp.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        });
    }

    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&resp.body) {
        let status = envelope.error.status_code.unwrap_or(resp.status);
        if status == STATUS_TOO_MANY_REQUESTS {
            return Err(UploadError::Throttled {
                retry_after: resp.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            });
        }
        return Err(UploadError::service(status, envelope.error.content));
    }

    if !resp.is_success() {
        return Err(UploadError::service(resp.status, resp.text()));
    }

    Ok(resp.body)
}

/// 解析 JSON 响应体
fn parse_json<T: DeserializeOwned>(body: Vec<u8>) -> UploadResult<T> {
    Ok(serde_json::from_slice(&body)?)
}

/// 公共请求头
fn with_common(req: ApiRequest, options: &UploadOptions) -> ApiRequest {
    req.query("jsonerrors", "1")
        .header("X-UC-User-Agent", options.user_agent())
}

/// 直传：POST /base/
///
/// 单请求上传完整载荷，返回新文件 uuid。
pub async fn base_upload(
    transport: &dyn Transport,
    options: &UploadOptions,
    data: Vec<u8>,
    file_name: &str,
    content_type: &str,
) -> UploadResult<BaseUploadResponse> {
    let mut form = vec![
        (
            "UPLOADCARE_PUB_KEY".to_string(),
            FormField::Text(options.public_key.clone()),
        ),
        (
            "UPLOADCARE_STORE".to_string(),
            FormField::Text(options.store_value().to_string()),
        ),
        (
            "source".to_string(),
            FormField::Text(options.source.clone().unwrap_or_else(|| "local".to_string())),
        ),
    ];
    if let Some(signature) = &options.secure_signature {
        form.push(("signature".to_string(), FormField::Text(signature.clone())));
    }
    if let Some(expire) = &options.secure_expire {
        form.push(("expire".to_string(), FormField::Text(expire.clone())));
    }
    form.push((
        "file".to_string(),
        FormField::File {
            data,
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
        },
    ));

    let req = with_common(ApiRequest::post(&options.base_url, "/base/"), options).form(form);
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// 文件信息：GET /info/
pub async fn info(
    transport: &dyn Transport,
    options: &UploadOptions,
    uuid: &str,
) -> UploadResult<FileInfo> {
    let req = with_common(
        ApiRequest::get(&options.base_url, "/info/")
            .query("pub_key", options.public_key.clone())
            .query("file_id", uuid)
            .query_opt("source", options.source.clone()),
        options,
    );
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// URL 导入：POST /from_url/
pub async fn from_url(
    transport: &dyn Transport,
    options: &UploadOptions,
    source_url: &str,
) -> UploadResult<FromUrlResponse> {
    let mut form = vec![
        (
            "pub_key".to_string(),
            FormField::Text(options.public_key.clone()),
        ),
        (
            "source_url".to_string(),
            FormField::Text(source_url.to_string()),
        ),
        (
            "store".to_string(),
            FormField::Text(options.store_value().to_string()),
        ),
        (
            "source".to_string(),
            FormField::Text(options.source.clone().unwrap_or_else(|| "url".to_string())),
        ),
    ];
    if let Some(file_name) = &options.file_name {
        form.push(("filename".to_string(), FormField::Text(file_name.clone())));
    }
    if let Some(check) = options.check_for_url_duplicates {
        form.push((
            "check_URL_duplicates".to_string(),
            FormField::Text(if check { "1" } else { "0" }.to_string()),
        ));
    }
    if let Some(save) = options.save_url_for_recurrent_uploads {
        form.push((
            "save_URL_duplicates".to_string(),
            FormField::Text(if save { "1" } else { "0" }.to_string()),
        ));
    }
    if let Some(signature) = &options.secure_signature {
        form.push(("signature".to_string(), FormField::Text(signature.clone())));
    }
    if let Some(expire) = &options.secure_expire {
        form.push(("expire".to_string(), FormField::Text(expire.clone())));
    }

    let req = with_common(ApiRequest::post(&options.base_url, "/from_url/"), options).form(form);
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// URL 导入状态：GET /from_url/status/
pub async fn from_url_status(
    transport: &dyn Transport,
    options: &UploadOptions,
    token: &str,
) -> UploadResult<ImportStatus> {
    let req = with_common(
        ApiRequest::get(&options.base_url, "/from_url/status/").query("token", token),
        options,
    );
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// 开启分片会话：POST /multipart/start/
pub async fn multipart_start(
    transport: &dyn Transport,
    options: &UploadOptions,
    size: u64,
) -> UploadResult<MultipartStartResponse> {
    let mut form = vec![
        (
            "UPLOADCARE_PUB_KEY".to_string(),
            FormField::Text(options.public_key.clone()),
        ),
        (
            "UPLOADCARE_STORE".to_string(),
            FormField::Text(options.store_value().to_string()),
        ),
        (
            "filename".to_string(),
            FormField::Text(options.effective_file_name().to_string()),
        ),
        ("size".to_string(), FormField::Text(size.to_string())),
        (
            "content_type".to_string(),
            FormField::Text(options.effective_content_type().to_string()),
        ),
        (
            "part_size".to_string(),
            FormField::Text(options.multipart_chunk_size.to_string()),
        ),
        (
            "source".to_string(),
            FormField::Text(options.source.clone().unwrap_or_else(|| "local".to_string())),
        ),
    ];
    if let Some(signature) = &options.secure_signature {
        form.push(("signature".to_string(), FormField::Text(signature.clone())));
    }
    if let Some(expire) = &options.secure_expire {
        form.push(("expire".to_string(), FormField::Text(expire.clone())));
    }

    let req = with_common(
        ApiRequest::post(&options.base_url, "/multipart/start/"),
        options,
    )
    .form(form);
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// 上传单个分片到预签名地址
pub async fn multipart_upload_part(
    transport: &dyn Transport,
    part_url: &str,
    data: Vec<u8>,
    content_type: &str,
) -> UploadResult<()> {
    let resp = transport.put_part(part_url, data, content_type).await?;
    check_response(resp)?;
    Ok(())
}

/// 请求服务端合并分片：POST /multipart/complete/
pub async fn multipart_complete(
    transport: &dyn Transport,
    options: &UploadOptions,
    uuid: &str,
) -> UploadResult<FileInfo> {
    let form = vec![
        ("uuid".to_string(), FormField::Text(uuid.to_string())),
        (
            "UPLOADCARE_PUB_KEY".to_string(),
            FormField::Text(options.public_key.clone()),
        ),
        (
            "source".to_string(),
            FormField::Text(options.source.clone().unwrap_or_else(|| "local".to_string())),
        ),
    ];

    let req = with_common(
        ApiRequest::post(&options.base_url, "/multipart/complete/"),
        options,
    )
    .form(form);
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}

/// 创建文件组：POST /group/
///
/// files[i] 按调用方给定顺序排列，组内顺序即该顺序。
pub async fn create_group(
    transport: &dyn Transport,
    options: &UploadOptions,
    uuids: &[String],
) -> UploadResult<GroupInfo> {
    debug!("创建文件组: {} 个文件", uuids.len());

    let mut form = vec![(
        "pub_key".to_string(),
        FormField::Text(options.public_key.clone()),
    )];
    for (i, uuid) in uuids.iter().enumerate() {
        form.push((format!("files[{}]", i), FormField::Text(uuid.clone())));
    }
    if let Some(signature) = &options.secure_signature {
        form.push(("signature".to_string(), FormField::Text(signature.clone())));
    }
    if let Some(expire) = &options.secure_expire {
        form.push(("expire".to_string(), FormField::Text(expire.clone())));
    }
    if let Some(source) = &options.source {
        form.push(("source".to_string(), FormField::Text(source.clone())));
    }

    let req = with_common(ApiRequest::post(&options.base_url, "/group/"), options).form(form);
    let body = check_response(transport.request(req).await?)?;
    parse_json(body)
}
