//! Open-Meteo hourly series client.
//!
//! Both the forecast and air-quality endpoints answer with the same shape:
//!
//! ```json
//! { "hourly": { "time": ["2024-05-01T00:00", ...], "pm2_5": [7.1, ...] } }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::feed_def::MetricFeedDefinition;
use crate::parsing::{nearest_index, parse_series_time};
use crate::{MetricFeed, SourceError};

/// Parallel `hourly.time` / `hourly.<series>` arrays of one response.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySeries {
    /// Sample timestamps (UTC).
    pub times: Vec<DateTime<Utc>>,
    /// Sample values; `None` where the API reported `null`.
    pub values: Vec<Option<f64>>,
}

fn payload_error(message: impl Into<String>) -> SourceError {
    SourceError::Payload {
        message: message.into(),
    }
}

impl HourlySeries {
    /// Extracts `hourly.time` and `hourly.<series>` from a response body.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Payload`] if either array is missing, a
    /// timestamp cannot be parsed, a value is not a number or `null`, or the
    /// arrays differ in length.
    pub fn from_payload(payload: &Value, series: &str) -> Result<Self, SourceError> {
        let hourly = payload
            .get("hourly")
            .ok_or_else(|| payload_error("missing `hourly` object"))?;

        let raw_times = hourly
            .get("time")
            .and_then(Value::as_array)
            .ok_or_else(|| payload_error("missing `hourly.time` array"))?;
        let raw_values = hourly
            .get(series)
            .and_then(Value::as_array)
            .ok_or_else(|| payload_error(format!("missing `hourly.{series}` array")))?;

        if raw_times.len() != raw_values.len() {
            return Err(payload_error(format!(
                "`hourly.time` has {} entries but `hourly.{series}` has {}",
                raw_times.len(),
                raw_values.len()
            )));
        }

        let times = raw_times
            .iter()
            .map(|t| {
                t.as_str()
                    .and_then(parse_series_time)
                    .ok_or_else(|| payload_error(format!("invalid timestamp {t}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let values = raw_values
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                Value::Number(n) => Ok(n.as_f64()),
                other => Err(payload_error(format!("non-numeric sample {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { times, values })
    }

    /// The sample whose timestamp is nearest to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Payload`] if the series is empty or the
    /// nearest sample is `null`.
    pub fn nearest_sample(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, f64), SourceError> {
        let index =
            nearest_index(&self.times, now).ok_or_else(|| payload_error("empty hourly series"))?;
        let value = self
            .values
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| payload_error(format!("no value at {}", self.times[index])))?;
        Ok((self.times[index], value))
    }
}

/// [`MetricFeed`] that fetches from the Open-Meteo APIs.
#[derive(Debug, Clone, Default)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
}

impl OpenMeteoClient {
    /// Creates a client with default HTTP settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client that issues requests through `client`.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricFeed for OpenMeteoClient {
    async fn fetch_series(
        &self,
        definition: &MetricFeedDefinition,
    ) -> Result<HourlySeries, SourceError> {
        let url = &definition.api_url;
        log::debug!("[{}] Fetching {url}", definition.id);

        let http_error = |source| SourceError::Http {
            url: url.clone(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(http_error)?;
        let payload: Value = serde_json::from_slice(&body)?;

        HourlySeries::from_payload(&payload, &definition.series)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_named_series() {
        let payload = json!({
            "hourly": {
                "time": ["2024-05-01T00:00", "2024-05-01T01:00"],
                "temperature_2m": [14.2, 13.9],
                "relativehumidity_2m": [80, 82]
            }
        });
        let series = HourlySeries::from_payload(&payload, "temperature_2m").unwrap();
        assert_eq!(series.times.len(), 2);
        assert_eq!(series.values, vec![Some(14.2), Some(13.9)]);
    }

    #[test]
    fn keeps_nulls_as_missing_samples() {
        let payload = json!({
            "hourly": { "time": ["2024-05-01T00:00"], "pm2_5": [null] }
        });
        let series = HourlySeries::from_payload(&payload, "pm2_5").unwrap();
        assert_eq!(series.values, vec![None]);
    }

    #[test]
    fn rejects_missing_series() {
        let payload = json!({ "hourly": { "time": ["2024-05-01T00:00"] } });
        assert!(matches!(
            HourlySeries::from_payload(&payload, "pm2_5"),
            Err(SourceError::Payload { .. })
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let payload = json!({
            "hourly": { "time": ["2024-05-01T00:00"], "pm2_5": [1.0, 2.0] }
        });
        assert!(HourlySeries::from_payload(&payload, "pm2_5").is_err());
    }

    #[test]
    fn rejects_unparseable_time() {
        let payload = json!({
            "hourly": { "time": ["soon"], "pm2_5": [1.0] }
        });
        assert!(HourlySeries::from_payload(&payload, "pm2_5").is_err());
    }

    #[test]
    fn nearest_sample_returns_time_and_value() {
        let payload = json!({
            "hourly": {
                "time": ["2024-05-01T11:00", "2024-05-01T12:00", "2024-05-01T13:00"],
                "pm2_5": [5.0, 6.5, 7.0]
            }
        });
        let series = HourlySeries::from_payload(&payload, "pm2_5").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 0).unwrap();
        let (at, value) = series.nearest_sample(now).unwrap();
        assert_eq!(at.to_string(), "2024-05-01 12:00:00 UTC");
        assert!((value - 6.5).abs() < f64::EPSILON);
    }

    #[test]
    fn nearest_null_sample_is_an_error() {
        let payload = json!({
            "hourly": { "time": ["2024-05-01T12:00"], "pm2_5": [null] }
        });
        let series = HourlySeries::from_payload(&payload, "pm2_5").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(series.nearest_sample(now).is_err());
    }

    #[test]
    fn empty_series_is_an_error() {
        let series = HourlySeries {
            times: vec![],
            values: vec![],
        };
        assert!(series.nearest_sample(Utc::now()).is_err());
    }
}
