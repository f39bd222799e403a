//! Error taxonomy for the resolve/fetch flow.
//!
//! The `Display` output of every variant is what ends up in the UI state's
//! error field, so messages are written for people, not for logs.

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    /// Connectivity or transport failure.
    #[error("Unexpected error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with a non-2xx status.
    #[error("API Error: {code} - {reason}")]
    Status { code: u16, reason: String },

    #[error("Empty response from server")]
    EmptyResponse,

    #[error("no location found for query: {0}")]
    NoLocationFound(String),

    /// Serialized job output exceeds the scheduler's payload limit.
    #[error("Response data too large")]
    PayloadTooLarge,

    #[error("Failed to parse {context}: {source}")]
    Parse {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Cancelled(String),

    /// A background job finished in the `failed` state.
    #[error("{0}")]
    WorkFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("bookmark for {locality}, {region} already exists")]
    DuplicateBookmark { region: String, locality: String },
}

impl WeatherError {
    pub(crate) fn parse(context: &'static str, source: serde_json::Error) -> Self {
        Self::Parse { context, source }
    }
}

pub type Result<T, E = WeatherError> = std::result::Result<T, E>;
