//! 服务器档案与远程命令的 HTTP 处理器

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::AppState,
    models::{CommandRequest, CommandResult, KeyUpload, ProfileSummary, RegisterProfileRequest},
};

/// 上传私钥的表单字段名
const PRIVATE_KEY_FIELD: &str = "privateKey";

/// 解析后的注册表单
#[derive(Debug)]
struct ServerForm {
    request: RegisterProfileRequest,
    key: Option<KeyUpload>,
}

/// 读取 multipart 表单：host、port、username 与私钥文件
///
/// 未知字段、重复字段、缺失字段均视为校验失败。
async fn read_server_form(mut multipart: Multipart) -> Result<ServerForm, AppError> {
    let mut host: Option<String> = None;
    let mut port: Option<String> = None;
    let mut username: Option<String> = None;
    let mut key: Option<KeyUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        let slot = match name.as_str() {
            "host" => &mut host,
            "port" => &mut port,
            "username" => &mut username,
            PRIVATE_KEY_FIELD => {
                if key.is_some() {
                    return Err(AppError::Validation(format!("duplicate field: {}", name)));
                }
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("failed to read {}: {}", PRIVATE_KEY_FIELD, e))
                })?;
                key = Some(KeyUpload::new(file_name, bytes.to_vec()));
                continue;
            }
            _ => return Err(AppError::Validation(format!("unknown field: {}", name))),
        };

        if slot.is_some() {
            return Err(AppError::Validation(format!("duplicate field: {}", name)));
        }
        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read {}: {}", name, e)))?;
        *slot = Some(text);
    }

    let host = host.ok_or_else(|| AppError::validation("missing field: host"))?;
    let username = username.ok_or_else(|| AppError::validation("missing field: username"))?;
    let port = port
        .ok_or_else(|| AppError::validation("missing field: port"))?
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation("port must be an integer"))?;

    Ok(ServerForm {
        request: RegisterProfileRequest {
            host,
            port,
            username,
        },
        key,
    })
}

/// 注册服务器
pub async fn register_server(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_server_form(multipart).await?;
    let profile = state
        .server_service
        .register_profile(form.request, form.key)
        .await?;

    Ok((StatusCode::CREATED, Json(ProfileSummary::from(&profile))))
}

/// 列出服务器
pub async fn list_servers(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let servers = state.server_service.list_profiles().await?;

    Ok(Json(json!({
        "servers": servers,
        "count": servers.len()
    })))
}

/// 注册前测试连接，不保存任何内容
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CommandResult>, AppError> {
    let form = read_server_form(multipart).await?;
    let result = state
        .server_service
        .test_connection(form.request, form.key)
        .await?;

    Ok(Json(result))
}

/// 探测已注册服务器的连通性
pub async fn probe_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CommandResult>, AppError> {
    let result = state.server_service.execute(id, None).await?;
    Ok(Json(result))
}

/// 在已注册服务器上执行命令
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<CommandResult>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    req.validate()?;
    if req.command.trim().is_empty() {
        return Err(AppError::validation("command must not be blank"));
    }

    let result = state.server_service.run_command(id, &req.command).await?;
    Ok(Json(result))
}
