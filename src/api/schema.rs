use crate::{repo::TrackedAddress, utils::AccountAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, result::Result as StdResult};
use uuid::Uuid;

/// Longest accepted address text; raw form is at most `-2147483648:` plus
/// 64 hex digits.
pub const MAX_ADDRESS_LEN: usize = 80;

#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub trait Validate: Sized {
    type Err;
    fn validate(self) -> StdResult<Self, Self::Err>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddAddressRequest {
    pub address: String,
}

impl Validate for AddAddressRequest {
    type Err = ValidationError;

    fn validate(mut self) -> StdResult<Self, Self::Err> {
        self.address = self.address.trim().to_string();
        if self.address.is_empty() {
            return Err(ValidationError("address is required".into()));
        }
        if self.address.len() > MAX_ADDRESS_LEN {
            return Err(ValidationError(format!(
                "address longer than {MAX_ADDRESS_LEN} characters"
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedAddressView {
    pub id: Uuid,
    /// Raw `wc:hex` form.
    pub address: AccountAddress,
    /// Bounceable user-friendly form, absent for workchains outside `i8`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TrackedAddress> for TrackedAddressView {
    fn from(r: TrackedAddress) -> Self {
        let address = r.address();
        Self {
            id: r.id,
            friendly: address.to_friendly(true, false).ok(),
            address,
            active: r.active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterView {
    pub bits: u64,
    pub hashes: u32,
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub connection: &'static str,
    pub queued_calls: usize,
    pub pending_blocks: u64,
    /// `None` when the lite-server did not answer.
    pub head_seqno: Option<u32>,
    pub filter: FilterView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_request_is_trimmed_and_required() {
        let ok = AddAddressRequest {
            address: format!("  0:{}  ", "ab".repeat(32)),
        }
        .validate()
        .unwrap();
        assert_eq!(ok.address, format!("0:{}", "ab".repeat(32)));

        let empty = AddAddressRequest {
            address: "   ".into(),
        };
        assert!(empty.validate().is_err());

        let long = AddAddressRequest {
            address: "x".repeat(MAX_ADDRESS_LEN + 1),
        };
        assert!(long.validate().is_err());
    }
}
