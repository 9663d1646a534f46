//! Row normalization for the historical crime CSV.
//!
//! Maps one `delitos_{year}.csv` record to a [`NewIncident`] or a
//! [`Rejection`]. Rows are never partially accepted.

use ba_urban_source_models::{NewIncident, RawRow};
use chrono::{NaiveDate, NaiveTime};

/// Type label used when the row has no `tipo`.
pub const UNKNOWN_TYPE: &str = "Unknown";

/// Hour used when the row has no `franja`.
const DEFAULT_HOUR: u32 = 12;

/// Why a row was dropped. Rejections are expected and high-frequency, so
/// they are counted rather than logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `latitud`, `longitud`, or `fecha` is missing or empty.
    MissingField(&'static str),
    /// A coordinate is the literal `"0"` the feed uses for "unknown".
    UnknownLocation,
    /// A coordinate is not a finite number.
    InvalidCoordinate,
    /// `fecha` or `franja` does not form a valid timestamp.
    InvalidTimestamp,
}

/// Returns the trimmed value of `column`, or `None` if missing or empty.
fn field<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.get(column)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Normalizes one CSV row into an incident.
///
/// # Errors
///
/// Returns the [`Rejection`] reason if the row cannot produce a complete
/// incident.
pub fn normalize_row(row: &RawRow) -> Result<NewIncident, Rejection> {
    let lat = field(row, "latitud").ok_or(Rejection::MissingField("latitud"))?;
    let lng = field(row, "longitud").ok_or(Rejection::MissingField("longitud"))?;
    let date = field(row, "fecha").ok_or(Rejection::MissingField("fecha"))?;

    if lat == "0" || lng == "0" {
        return Err(Rejection::UnknownLocation);
    }

    let latitude = parse_coordinate(lat)?;
    let longitude = parse_coordinate(lng)?;

    let date =
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| Rejection::InvalidTimestamp)?;
    let hour = field(row, "franja").map_or(Ok(DEFAULT_HOUR), parse_hour)?;
    let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or(Rejection::InvalidTimestamp)?;
    let occurred_at = date.and_time(time).and_utc();

    let zone = field(row, "comuna").map(zone_label);

    let subtype = field(row, "subtipo").unwrap_or_default();
    let neighborhood = field(row, "barrio").unwrap_or_default();
    let description = format!("{subtype} - {neighborhood}").trim().to_string();

    let incident_type = field(row, "tipo").unwrap_or(UNKNOWN_TYPE).to_string();

    Ok(NewIncident {
        incident_type,
        description,
        latitude,
        longitude,
        zone,
        occurred_at,
    })
}

fn parse_coordinate(value: &str) -> Result<f64, Rejection> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(Rejection::InvalidCoordinate)
}

/// Parses the `franja` hour bucket (`"9"`, `"09"`, `"23"`).
fn parse_hour(value: &str) -> Result<u32, Rejection> {
    if value.len() > 2 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::InvalidTimestamp);
    }
    value
        .parse::<u32>()
        .ok()
        .filter(|hour| *hour < 24)
        .ok_or(Rejection::InvalidTimestamp)
}

/// `"7"` becomes `"Comuna 7"`; values already naming the comuna pass
/// through unchanged.
fn zone_label(comuna: &str) -> String {
    if comuna.to_lowercase().contains("comuna") {
        comuna.to_string()
    } else {
        format!("Comuna {comuna}")
    }
}
