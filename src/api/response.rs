use super::error::ErrorCode;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ErrorCode::Ok.code(),
            message: ErrorCode::Ok.default_message().to_string(),
            data: Some(data),
        }
    }
    pub fn error(code: ErrorCode, msg: Option<String>) -> Self {
        Self {
            code: code.code(),
            message: msg.unwrap_or_else(|| code.default_message().to_string()),
            data: None,
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Error envelope with the HTTP status implied by `code`.
pub fn error_response(code: ErrorCode, msg: impl Into<String>) -> Response {
    (
        code.status(),
        Json(ApiResponse::<serde_json::Value>::error(code, Some(msg.into()))),
    )
        .into_response()
}
