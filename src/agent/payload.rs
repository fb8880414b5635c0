//! Reading the few fields the agent needs out of opaque forecast payloads
//!
//! Forecast bodies are kept as raw JSON. Only three things are read from
//! them, at configurable JSON pointers: whether the query matched a place,
//! when the forecast was created, and the place's coordinates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when reading a forecast payload
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Body is not valid JSON
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The query did not match any place
    #[error("Payload contains no results")]
    NoResults,
}

/// JSON pointers locating the fields the agent reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadPointers {
    /// Must be present and non-null for a valid location
    pub results: String,
    pub created: String,
    pub latitude: String,
    pub longitude: String,
}

impl Default for PayloadPointers {
    fn default() -> Self {
        Self {
            results: "/query/results".to_string(),
            created: "/query/created".to_string(),
            latitude: "/query/results/channel/item/lat".to_string(),
            longitude: "/query/results/channel/item/long".to_string(),
        }
    }
}

/// Latitude and longitude as the provider reports them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: String,
    pub longitude: String,
}

impl Coordinates {
    /// `"lat/long"` form used in the preference store
    pub fn to_record(&self) -> String {
        format!("{}/{}", self.latitude, self.longitude)
    }

    pub fn from_record(record: &str) -> Option<Self> {
        let (latitude, longitude) = record.split_once('/')?;
        if latitude.is_empty() || longitude.is_empty() {
            return None;
        }
        Some(Self {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
        })
    }
}

/// A parsed forecast payload
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPayload {
    /// Creation time reported by the provider, if it could be read
    pub created: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
    pub body: Value,
}

/// Renders a scalar JSON value as a string
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a forecast body
pub fn parse_forecast(body: &[u8], pointers: &PayloadPointers) -> Result<ForecastPayload, PayloadError> {
    let body: Value = serde_json::from_slice(body)?;

    match body.pointer(&pointers.results) {
        None | Some(Value::Null) => return Err(PayloadError::NoResults),
        Some(_) => {}
    }

    let created = body
        .pointer(&pointers.created)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let latitude = body.pointer(&pointers.latitude).and_then(scalar);
    let longitude = body.pointer(&pointers.longitude).and_then(scalar);
    let coordinates = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };

    Ok(ForecastPayload {
        created,
        coordinates,
        body,
    })
}

#[cfg(test)]
pub(crate) fn sample_forecast(created: &str, lat: &str, long: &str) -> String {
    serde_json::json!({
        "query": {
            "created": created,
            "results": {
                "channel": {
                    "item": { "lat": lat, "long": long, "condition": { "temp": "21" } }
                }
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reads_created_and_coordinates() {
        let body = sample_forecast("2017-08-09T10:00:00Z", "48.85", "2.35");
        let payload = parse_forecast(body.as_bytes(), &PayloadPointers::default()).unwrap();

        assert_eq!(
            payload.created,
            Some(DateTime::parse_from_rfc3339("2017-08-09T10:00:00Z").unwrap().with_timezone(&Utc))
        );
        assert_eq!(
            payload.coordinates,
            Some(Coordinates {
                latitude: "48.85".to_string(),
                longitude: "2.35".to_string()
            })
        );
    }

    #[test]
    fn test_parse_null_results_is_no_results() {
        let body = r#"{"query":{"created":"2017-08-09T10:00:00Z","results":null}}"#;
        let result = parse_forecast(body.as_bytes(), &PayloadPointers::default());
        assert!(matches!(result, Err(PayloadError::NoResults)));
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = parse_forecast(b"<html>", &PayloadPointers::default());
        assert!(matches!(result, Err(PayloadError::Json(_))));
    }

    #[test]
    fn test_parse_numeric_coordinates() {
        let body = r#"{"query":{"results":{"channel":{"item":{"lat":51.5,"long":-0.12}}}}}"#;
        let payload = parse_forecast(body.as_bytes(), &PayloadPointers::default()).unwrap();
        let coords = payload.coordinates.unwrap();
        assert_eq!(coords.to_record(), "51.5/-0.12");
        assert!(payload.created.is_none());
    }

    #[test]
    fn test_custom_pointers() {
        let pointers = PayloadPointers {
            results: "/data".to_string(),
            created: "/data/time".to_string(),
            latitude: "/data/lat".to_string(),
            longitude: "/data/lon".to_string(),
        };
        let body = r#"{"data":{"time":"2024-01-01T00:00:00+01:00","lat":"1","lon":"2"}}"#;
        let payload = parse_forecast(body.as_bytes(), &pointers).unwrap();
        assert_eq!(payload.created.unwrap().to_rfc3339(), "2023-12-31T23:00:00+00:00");
        assert_eq!(payload.coordinates.unwrap().to_record(), "1/2");
    }

    #[test]
    fn test_coordinates_record_roundtrip() {
        let coords = Coordinates::from_record("48.85/2.35").unwrap();
        assert_eq!(coords.latitude, "48.85");
        assert_eq!(coords.longitude, "2.35");
        assert!(Coordinates::from_record("48.85").is_none());
        assert!(Coordinates::from_record("/2.35").is_none());
    }
}
