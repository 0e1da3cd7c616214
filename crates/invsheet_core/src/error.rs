//! Shared error-kind taxonomy.
//!
//! # Responsibility
//! - Give every layer (reducer, store, api, transport) one vocabulary for
//!   classifying failures.
//!
//! # Invariants
//! - `ErrorKind` string forms are part of the HTTP error body contract and
//!   must stay stable.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Coarse failure class shared by API responses and dispatcher callbacks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or rule-breaking payload.
    Validation,
    /// Sheet, item or member id absent at persistence time.
    NotFound,
    /// Server could not be reached or the response was unreadable.
    Network,
    /// Some sub-operations of a composite action were persisted, others not.
    PartialApplication,
    /// Action `type` not recognised.
    UnknownAction,
    /// Storage backend failure.
    Storage,
}

impl ErrorKind {
    /// HTTP status used when this kind is reported by the route handler.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Validation | Self::UnknownAction => 400,
            Self::NotFound => 404,
            Self::PartialApplication => 409,
            Self::Network => 502,
            Self::Storage => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;
    use std::str::FromStr;

    #[test]
    fn kind_string_form_is_snake_case() {
        assert_eq!(ErrorKind::PartialApplication.as_ref(), "partial_application");
        assert_eq!(
            ErrorKind::from_str("unknown_action").unwrap(),
            ErrorKind::UnknownAction
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::UnknownAction.http_status(), 400);
    }
}
