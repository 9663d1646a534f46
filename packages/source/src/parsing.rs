//! Time parsing and nearest-sample selection for hourly series.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// Parses an Open-Meteo hourly timestamp (`"2024-05-01T13:00"`), with or
/// without seconds. Open-Meteo reports GMT unless a timezone is requested.
#[must_use]
pub fn parse_series_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Index of the timestamp closest to `now`.
///
/// Linear scan with index 0 as the initial candidate; a later index only
/// wins on a strictly smaller distance, so ties go to the earliest sample.
/// Returns `None` for an empty slice.
#[must_use]
pub fn nearest_index(times: &[DateTime<Utc>], now: DateTime<Utc>) -> Option<usize> {
    let distance = |t: &DateTime<Utc>| (*t - now).abs();

    let first = times.first()?;
    let mut best = 0;
    let mut best_diff: TimeDelta = distance(first);

    for (i, t) in times.iter().enumerate().skip(1) {
        let diff = distance(t);
        if diff < best_diff {
            best = i;
            best_diff = diff;
        }
    }

    Some(best)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn parses_minute_precision() {
        let dt = parse_series_time("2024-05-01T13:00").unwrap();
        assert_eq!(dt.to_string(), "2024-05-01 13:00:00 UTC");
    }

    #[test]
    fn parses_second_precision() {
        let dt = parse_series_time("2024-05-01T13:00:30").unwrap();
        assert_eq!(dt.to_string(), "2024-05-01 13:00:30 UTC");
    }

    #[test]
    fn rejects_invalid_time() {
        assert!(parse_series_time("yesterday").is_none());
        assert!(parse_series_time("2024-05-01").is_none());
    }

    #[test]
    fn picks_closest_sample() {
        let now = at(12, 0);
        let times = [at(11, 50), at(11, 59), at(12, 5)];
        assert_eq!(nearest_index(&times, now), Some(1));
    }

    #[test]
    fn ties_keep_earliest_index() {
        let now = at(12, 0);
        let times = [at(11, 30), at(12, 30)];
        assert_eq!(nearest_index(&times, now), Some(0));
    }

    #[test]
    fn handles_all_future_samples() {
        let now = at(0, 0);
        let times = [at(1, 0), at(2, 0), at(3, 0)];
        assert_eq!(nearest_index(&times, now), Some(0));
    }

    #[test]
    fn empty_series_has_no_nearest() {
        assert_eq!(nearest_index(&[], at(12, 0)), None);
    }
}
