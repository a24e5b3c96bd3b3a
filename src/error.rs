//! Errors surfaced by route reconstruction.
//!
//! Only `NoData` and a failure to read the point log are ever returned as
//! `Err` from the engine; the other variants are recovered locally and end up
//! as the `warning` of a fallback [`crate::route::RouteOutcome`].

use thiserror::Error;

use crate::directions_codec::DecodeError;

#[derive(Clone, Debug, Error)]
pub enum RouteError {
    #[error("no recorded points for the requested day")]
    NoData,
    #[error("directions provider failed: {message}")]
    Provider {
        message: String,
        status_code: Option<u16>,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("daily directions quota exceeded")]
    QuotaExceeded,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RouteError {
    pub fn persistence(error: anyhow::Error) -> Self {
        RouteError::Persistence(format!("{error:#}"))
    }
}
