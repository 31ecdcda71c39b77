//! Control documents sent to the collector ahead of the data stream

use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const PROTOCOL_VERSION: &str = "1.0.12";

/// Integer UTC epoch seconds, the timestamp format the collector expects
pub fn epoch_seconds(time: &DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Read a JSON object from disk
pub fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Couldn't read {}: {}", path.display(), e)))?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Config(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
    }
}

/// The sensor's location and system descriptions, loaded once at startup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorDocuments {
    pub location: Map<String, Value>,
    pub system: Map<String, Value>,
}

impl SensorDocuments {
    pub fn load(location: &Path, system: &Path) -> Result<Self> {
        Ok(Self {
            location: read_document(location)?,
            system: read_document(system)?,
        })
    }

    /// Both documents stamped for sending, location first
    pub fn stamp(&self, t: i64, sensor_id: &str) -> [SensorDocument; 2] {
        [
            SensorDocument::new(self.location.clone(), t, sensor_id),
            SensorDocument::new(self.system.clone(), t, sensor_id),
        ]
    }
}

/// An operator-supplied document with the runtime fields added
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDocument {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub t: i64,
    #[serde(rename = "SensorID")]
    pub sensor_id: String,
}

impl SensorDocument {
    pub fn new(mut fields: Map<String, Value>, t: i64, sensor_id: &str) -> Self {
        // Runtime values win over anything stale in the file
        fields.remove("t");
        fields.remove("SensorID");
        Self {
            fields,
            t,
            sensor_id: sensor_id.to_owned(),
        }
    }
}

/// What was measured and how
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementParams {
    #[serde(rename = "fStart")]
    pub f_start: f64,
    #[serde(rename = "fStop")]
    pub f_stop: f64,
    /// Channel count, which is also the length of every binary frame
    pub n: usize,
    pub td: i64,
    /// Realized measurement window in seconds
    pub tm: f64,
    #[serde(rename = "Det")]
    pub det: String,
    #[serde(rename = "Atten")]
    pub atten: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataHeader {
    pub ver: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "SensorID")]
    pub sensor_id: String,
    pub sensor_key: String,
    #[serde(rename = "t")]
    pub t: i64,
    pub sys2_detect: String,
    pub sensitivity: String,
    #[serde(rename = "mType")]
    pub m_type: String,
    #[serde(rename = "t1")]
    pub t1: i64,
    #[serde(rename = "a")]
    pub a: i64,
    #[serde(rename = "nM")]
    pub n_m: i64,
    #[serde(rename = "Ta")]
    pub ta: i64,
    #[serde(rename = "OL")]
    pub ol: String,
    #[serde(rename = "wnI")]
    pub wn_i: f64,
    pub comment: String,
    pub processed: String,
    pub data_type: String,
    pub byte_order: String,
    pub compression: String,
    #[serde(flatten)]
    pub params: MeasurementParams,
}

impl DataHeader {
    pub fn new(sensor_id: &str, t: i64, params: MeasurementParams) -> Self {
        Self {
            ver: PROTOCOL_VERSION.to_owned(),
            kind: "Data".to_owned(),
            sensor_id: sensor_id.to_owned(),
            sensor_key: "NaN".to_owned(),
            t,
            sys2_detect: "LTE".to_owned(),
            sensitivity: "Low".to_owned(),
            m_type: "FFT-Power".to_owned(),
            t1: t,
            a: 1,
            n_m: -1,
            ta: -1,
            ol: "NaN".to_owned(),
            wn_i: -77.0,
            comment: "Using hard-coded (not detected) system noise power for wnI".to_owned(),
            processed: "False".to_owned(),
            data_type: "Binary - int8".to_owned(),
            byte_order: "N/A".to_owned(),
            compression: "None".to_owned(),
            params,
        }
    }

    /// Length in bytes of each binary frame that follows this header
    pub fn frame_len(&self) -> usize {
        self.params.n
    }
}
