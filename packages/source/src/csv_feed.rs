//! Streamed CSV download for the yearly historical feed.
//!
//! The response body is never buffered: bytes flow from the HTTP response
//! through a [`StreamReader`] into an async CSV reader, and each record is
//! yielded as a [`RawRow`] as soon as it is parsed.

use async_trait::async_trait;
use ba_urban_source_models::RawRow;
use futures::{StreamExt as _, TryStreamExt as _};
use tokio_util::io::StreamReader;

use crate::feed_def::HistoricalFeedDefinition;
use crate::{HistoricalFeed, RowStream, SourceError};

/// Historical feed backed by the yearly `delitos_{year}.csv` downloads.
pub struct CsvYearFeed {
    client: reqwest::Client,
    definition: HistoricalFeedDefinition,
}

impl CsvYearFeed {
    /// Creates a feed for `definition` using a default HTTP client.
    #[must_use]
    pub fn new(definition: HistoricalFeedDefinition) -> Self {
        Self::with_client(reqwest::Client::new(), definition)
    }

    /// Creates a feed that issues requests through `client`.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, definition: HistoricalFeedDefinition) -> Self {
        Self { client, definition }
    }

    /// The definition this feed downloads.
    #[must_use]
    pub const fn definition(&self) -> &HistoricalFeedDefinition {
        &self.definition
    }
}

#[async_trait]
impl HistoricalFeed for CsvYearFeed {
    fn id(&self) -> &str {
        &self.definition.id
    }

    async fn open_year(&self, year: i32) -> Result<RowStream, SourceError> {
        let url = self.definition.url_for_year(year);
        log::info!("[{}] Downloading {url}", self.definition.id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SourceError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(csv_rows(StreamReader::new(Box::pin(body))))
    }
}

/// Parses a headed CSV from `reader` into a stream of rows.
///
/// Header names and values are trimmed, invalid UTF-8 is replaced, and
/// records with a different field count than the header are accepted
/// (missing trailing fields are simply absent from the row).
pub fn csv_rows<R>(reader: R) -> RowStream
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut reader = csv_async::AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(reader);

        let headers: Vec<String> = reader
            .byte_headers()
            .await
            .map_err(SourceError::from)?
            .iter()
            .map(|h| {
                String::from_utf8_lossy(h)
                    .trim()
                    .trim_start_matches('\u{feff}')
                    .to_owned()
            })
            .collect();

        let mut records = std::pin::pin!(reader.byte_records());
        while let Some(record) = records.next().await {
            let record = record.map_err(SourceError::from)?;
            let row: RawRow = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| {
                    (header.clone(), String::from_utf8_lossy(value).trim().to_owned())
                })
                .collect();
            yield row;
        }
    };

    Box::pin(stream)
}
