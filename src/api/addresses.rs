use super::{
    AppState,
    error::AppError,
    request::{PathAddress, ValidatedJson},
    response::{created, ok},
    schema::{AddAddressRequest, TrackedAddressView},
};
use crate::utils::AccountAddress;
use axum::{extract::State, response::Response};
use serde_json::json;

pub async fn add_address(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<AddAddressRequest>,
) -> Result<Response, AppError> {
    let address: AccountAddress = body.address.parse()?;
    let record = state.tracking.add(&address).await?;
    Ok(created(TrackedAddressView::from(record)))
}

pub async fn get_address(
    State(state): State<AppState>,
    PathAddress(address): PathAddress,
) -> Result<Response, AppError> {
    match state.tracking.get(&address).await? {
        Some(record) => Ok(ok(TrackedAddressView::from(record))),
        None => Err(AppError::AddressNotFound(address.to_string())),
    }
}

/// Disabling an unknown or already disabled address is a 404 so callers can
/// tell it apart from a change.
pub async fn disable_address(
    State(state): State<AppState>,
    PathAddress(address): PathAddress,
) -> Result<Response, AppError> {
    if state.tracking.disable(&address).await? {
        Ok(ok(json!({ "address": address, "active": false })))
    } else {
        Err(AppError::AddressNotFound(format!(
            "{address} is not actively tracked"
        )))
    }
}

pub async fn reactivate_address(
    State(state): State<AppState>,
    PathAddress(address): PathAddress,
) -> Result<Response, AppError> {
    let record = state.tracking.reactivate(&address).await?;
    Ok(ok(TrackedAddressView::from(record)))
}
