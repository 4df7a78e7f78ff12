use super::response::error_response;
use crate::{error::StoreError, utils::AddressError};
use axum::{http::StatusCode, response::Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Validation = 1000,
    AddressInvalid = 1001,
    JsonInvalid = 1002,
    AddressNotFound = 2000,
    AddressConflict = 2001,
    Internal = 9000,
    Database = 9001,
    Upstream = 9003,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::Validation => "validation error",
            ErrorCode::AddressInvalid => "invalid address",
            ErrorCode::JsonInvalid => "invalid json body",
            ErrorCode::AddressNotFound => "address not found",
            ErrorCode::AddressConflict => "address conflict",
            ErrorCode::Internal => "internal error",
            ErrorCode::Database => "database error",
            ErrorCode::Upstream => "lite-server error",
        }
    }
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::Ok => StatusCode::OK,
            ErrorCode::Validation
            | ErrorCode::AddressInvalid
            | ErrorCode::JsonInvalid => StatusCode::BAD_REQUEST,
            ErrorCode::AddressNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AddressConflict => StatusCode::CONFLICT,
            ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
            ErrorCode::Internal | ErrorCode::Database => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid address: {0}")]
    AddressInvalid(String),
    #[error("invalid json body: {0}")]
    JsonInvalid(String),
    #[error("address not found: {0}")]
    AddressNotFound(String),
    #[error("{0}")]
    AddressConflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("lite-server error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::Validation,
            AppError::AddressInvalid(_) => ErrorCode::AddressInvalid,
            AppError::JsonInvalid(_) => ErrorCode::JsonInvalid,
            AppError::AddressNotFound(_) => ErrorCode::AddressNotFound,
            AppError::AddressConflict(_) => ErrorCode::AddressConflict,
            AppError::Database(_) => ErrorCode::Database,
            AppError::Upstream(_) => ErrorCode::Upstream,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }
    pub fn to_response(&self) -> Response {
        let code = self.code();
        if code.status().is_server_error() {
            tracing::error!(
                code = code.code(),
                error = %self,
                "request failed"
            );
        }
        error_response(code, self.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::AddressConflict(msg),
            StoreError::NotFound(msg) => AppError::AddressNotFound(msg),
            StoreError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<AddressError> for AppError {
    fn from(e: AddressError) -> Self {
        AppError::AddressInvalid(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_codes() {
        let conflict: AppError = StoreError::Conflict("dup".into()).into();
        assert_eq!(conflict.code(), ErrorCode::AddressConflict);
        assert_eq!(conflict.code().status(), StatusCode::CONFLICT);

        let db: AppError =
            StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(db.code().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(db.code().code(), 9001);
    }
}
