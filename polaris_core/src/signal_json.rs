//! Signal recording parser.
//!
//! A recording is a JSON array of measurement objects (optionally wrapped
//! in an enclosing object, e.g. alongside ground-truth metadata). The
//! first record's coordinates anchor the planar frame shared by every
//! sample of the run. Malformed records are skipped with a warning.

use crate::projection::PlanarFrame;
use crate::sample::Sample;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SignalParseError {
    #[error("cannot read signals file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no signal array found in the file")]
    NoSignalArray,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRecord {
    latitude: f64,
    longitude: f64,
    rssi: i32,
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default, alias = "dev_id")]
    device_id: Option<String>,
    #[serde(default, alias = "timestamp_ms")]
    timestamp: i64,
}

/// Parse a recording from its JSON text.
pub fn parse_signals(content: &str) -> Result<Vec<Sample>, SignalParseError> {
    let value: Value = serde_json::from_str(content)?;
    let records = find_record_array(&value).ok_or(SignalParseError::NoSignalArray)?;

    let mut samples = Vec::with_capacity(records.len());
    let mut frame: Option<PlanarFrame> = None;

    for (index, record) in records.iter().enumerate() {
        match serde_json::from_value::<RawRecord>(record.clone()) {
            Ok(raw) => {
                let frame =
                    *frame.get_or_insert_with(|| PlanarFrame::new(raw.latitude, raw.longitude));
                samples.push(Sample::new(
                    raw.latitude,
                    raw.longitude,
                    frame,
                    raw.rssi,
                    raw.timestamp,
                    raw.ssid,
                    raw.device_id,
                ));
            }
            Err(err) => warn!("skipping malformed record {index}: {err}"),
        }
    }
    Ok(samples)
}

/// Read and parse a recording file.
pub fn parse_signals_file(path: &Path) -> Result<Vec<Sample>, SignalParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_signals(&content)
}

/// The measurement array: the document itself, or the first array value of
/// an enclosing object.
fn find_record_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.values().find_map(Value::as_array),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let content = r#"[
            {"latitude": 59.8586, "longitude": 17.6389, "rssi": -50, "ssid": "net-a", "timestamp": 1000},
            {"latitude": 59.8590, "longitude": 17.6395, "rssi": -55, "ssid": "net-a", "timestamp": 2000}
        ]"#;
        let samples = parse_signals(content).unwrap();
        assert_eq!(samples.len(), 2);

        // The frame is anchored at the first record
        assert_eq!(samples[0].planar().unwrap(), (0.0, 0.0));
        assert_eq!(samples[0].rssi, -50);
        assert_eq!(samples[0].ssid.as_deref(), Some("net-a"));
        assert_eq!(samples[1].timestamp_ms, 2000);
        let (x, y) = samples[1].planar().unwrap();
        assert!(x > 0.0 && y > 0.0);
    }

    #[test]
    fn test_parse_wrapped_recording() {
        let content = r#"{
            "source_pos": {"x": 59.8600, "y": 17.6400},
            "signals": [
                {"latitude": 59.8586, "longitude": 17.6389, "rssi": -40, "timestamp_ms": 5}
            ]
        }"#;
        let samples = parse_signals(content).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_ms, 5);
        assert!(samples[0].device_id.is_none());
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let content = r#"[
            {"latitude": 59.8586, "longitude": 17.6389, "rssi": -40},
            {"latitude": "not a number", "longitude": 17.6389, "rssi": -41},
            {"longitude": 17.6400, "rssi": -42},
            {"latitude": 59.8590, "longitude": 17.6395, "rssi": -43}
        ]"#;
        let samples = parse_signals(content).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].rssi, -40);
        assert_eq!(samples[1].rssi, -43);
    }

    #[test]
    fn test_no_array_is_an_error() {
        assert!(matches!(
            parse_signals(r#"{"foo": 1}"#),
            Err(SignalParseError::NoSignalArray)
        ));
        assert!(matches!(
            parse_signals("not json at all"),
            Err(SignalParseError::Json(_))
        ));
    }

    #[test]
    fn test_device_id_field() {
        let content = r#"[
            {"latitude": 59.8586, "longitude": 17.6389, "rssi": -40, "dev_id": "phone-1", "timestamp": 1}
        ]"#;
        let samples = parse_signals(content).unwrap();
        assert_eq!(samples[0].device_id.as_deref(), Some("phone-1"));
    }
}
