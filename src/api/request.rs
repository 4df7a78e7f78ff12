use super::schema::{Validate, ValidationError};
use crate::{
    api::{error::AppError, request_id_header},
    utils::AccountAddress,
};
use axum::extract::Json;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::{
    extract::{FromRequest, FromRequestParts, Path},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

fn extract_request_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(request_id_header())
        .and_then(|v| v.to_str().ok())
}

/// JSON body that passed [`Validate`]; rejects with the error envelope.
pub struct ValidatedJson<T>(pub T);

impl<T> ValidatedJson<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync + 'static,
    T: Validate<Err = ValidationError> + DeserializeOwned + Send + 'static,
{
    type Rejection = Response;
    fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send
    {
        // the Json extractor consumes the request, keep the headers for logs
        let headers_snapshot = req.headers().clone();
        async move {
            let Json(val) = match Json::<T>::from_request(req, state).await {
                Ok(json) => json,
                Err(rejection) => {
                    let rid = extract_request_id(&headers_snapshot);
                    tracing::debug!(
                        target = "extractor",
                        extractor = "ValidatedJson",
                        request_id = rid.unwrap_or(""),
                        error = %rejection,
                        "json deserialize failed"
                    );
                    return Err(AppError::JsonInvalid(
                        "invalid json body".into(),
                    )
                    .to_response());
                }
            };
            match val.validate() {
                Ok(v) => Ok(ValidatedJson(v)),
                Err(e) => {
                    let rid = extract_request_id(&headers_snapshot);
                    tracing::debug!(
                        target = "extractor",
                        extractor = "ValidatedJson",
                        error = %e.0,
                        request_id = rid.unwrap_or(""),
                        "json validation failed"
                    );
                    Err(AppError::Validation(e.0).to_response())
                }
            }
        }
    }
}

/// `{address}` path segment in raw or user-friendly form.
pub struct PathAddress(pub AccountAddress);

impl<S> FromRequestParts<S> for PathAddress
where
    S: Send + Sync + 'static,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send
    {
        async move {
            let raw = match Path::<String>::from_request_parts(parts, state)
                .await
            {
                Ok(Path(raw)) => raw,
                Err(_) => {
                    return Err(AppError::Validation("invalid path".into())
                        .to_response());
                }
            };
            match raw.parse::<AccountAddress>() {
                Ok(address) => Ok(PathAddress(address)),
                Err(e) => {
                    let rid = extract_request_id(&parts.headers);
                    tracing::debug!(
                        target = "extractor",
                        extractor = "PathAddress",
                        error = %e,
                        request_id = rid.unwrap_or(""),
                        "address parse failed"
                    );
                    Err(AppError::from(e).to_response())
                }
            }
        }
    }
}
