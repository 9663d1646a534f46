#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Feed definitions, fetchers, and row normalization.
//!
//! The historical crime CSV is exposed through the [`HistoricalFeed`]
//! trait as a stream of [`RawRow`] records, and the hourly Open-Meteo
//! series through [`MetricFeed`]. Both are traits so the ingestion runner
//! can be driven by in-memory feeds in tests.

pub mod csv_feed;
pub mod feed_def;
pub mod normalize;
pub mod open_meteo;
pub mod parsing;
pub mod registry;

use async_trait::async_trait;
use ba_urban_source_models::RawRow;
use futures::stream::BoxStream;

use crate::feed_def::MetricFeedDefinition;
use crate::open_meteo::HourlySeries;

/// Errors that can occur while fetching or decoding a feed.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        /// Request URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// CSV stream could not be read or parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload parsed but does not have the expected structure.
    #[error("Malformed payload: {message}")]
    Payload {
        /// Description of what went wrong.
        message: String,
    },

    /// An embedded feed definition is invalid.
    #[error("Invalid feed definition: {0}")]
    Config(#[from] toml::de::Error),
}

impl SourceError {
    /// Whether this error happened while retrieving data (network or
    /// HTTP status) rather than while decoding it.
    #[must_use]
    pub fn is_fetch_failure(&self) -> bool {
        match self {
            Self::Http { .. } | Self::HttpStatus { .. } => true,
            Self::Csv(e) => matches!(e.kind(), csv_async::ErrorKind::Io(_)),
            Self::Json(_) | Self::Payload { .. } | Self::Config(_) => false,
        }
    }
}

/// A stream of raw CSV records, in file order.
pub type RowStream = BoxStream<'static, Result<RawRow, SourceError>>;

/// A yearly historical feed that can be opened as a row stream.
#[async_trait]
pub trait HistoricalFeed: Send + Sync {
    /// Returns a unique identifier for this feed (e.g., `"ba_delitos"`).
    fn id(&self) -> &str;

    /// Opens the streamed download for `year`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails or the server responds
    /// with a non-success status.
    async fn open_year(&self, year: i32) -> Result<RowStream, SourceError>;
}

/// A feed of hourly time series, one payload per request.
#[async_trait]
pub trait MetricFeed: Send + Sync {
    /// Fetches the series described by `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails or the payload is not a
    /// well-formed hourly series.
    async fn fetch_series(
        &self,
        definition: &MetricFeedDefinition,
    ) -> Result<HourlySeries, SourceError>;
}
