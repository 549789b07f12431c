use crate::model::{Coordinates, MediaKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Resolver failures. `NotFound` is the ordinary "zero search results"
/// outcome; everything else is an upstream/network problem.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no {kind} results for '{query}'")]
    NotFound { kind: MediaKind, query: String },

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// Data-level failures of the fetch pipeline. These are never retried by
/// the transport layer; the frontend decides between history fallback and
/// an error screen.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no recent sighting near {coords}")]
    NoSighting { coords: Coordinates },

    #[error("no photo available for '{species}'")]
    MediaUnavailable { species: String },

    #[error("sighting provider request failed")]
    Provider(#[source] anyhow::Error),
}

/// Transport-level failures. Retried once inside the client before
/// surfacing; data-level errors pass through untouched.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("background context unreachable")]
    Unavailable,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Remote(WireError),
}

/// What the frontend ultimately shows when both the live fetch and the
/// history fallback come up empty.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("no recent sighting for the configured region")]
    NoSighting,

    #[error("no photo available for today's bird")]
    MediaUnavailable,

    #[error("fetch failed and view history is empty")]
    NetworkErrorNoCache,
}

/// Serializable error payload for transport responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    NoSighting,
    MediaUnavailable,
    Provider,
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSighting => "no-sighting",
            ErrorCode::MediaUnavailable => "media-unavailable",
            ErrorCode::Provider => "provider",
            ErrorCode::NotFound => "not-found",
        }
    }
}

impl From<&FetchError> for WireError {
    fn from(err: &FetchError) -> Self {
        let code = match err {
            FetchError::NoSighting { .. } => ErrorCode::NoSighting,
            FetchError::MediaUnavailable { .. } => ErrorCode::MediaUnavailable,
            FetchError::Provider(_) => ErrorCode::Provider,
        };
        WireError {
            code,
            message: err.to_string(),
        }
    }
}

impl From<&ResolveError> for WireError {
    fn from(err: &ResolveError) -> Self {
        let code = match err {
            ResolveError::NotFound { .. } => ErrorCode::NotFound,
            ResolveError::Upstream(_) => ErrorCode::Provider,
        };
        WireError {
            code,
            message: err.to_string(),
        }
    }
}
