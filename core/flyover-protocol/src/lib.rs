//! IPC protocol types and validation for the flyover daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_KEY_LEN: usize = 64;

/// Attributes snapshot stored when nothing is known about the airframe.
pub const UNKNOWN_AIRCRAFT: &str = "unknown aircraft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    RecordSighting,
    GetSightingCount,
    GetPreviousSessionEnd,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Airframe details returned by the aircraft lookup service.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AircraftInfo {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default, rename = "type")]
    pub aircraft_type: Option<String>,
}

/// Formats the descriptive snapshot kept on a session ("Boeing 737-800").
pub fn describe_aircraft(aircraft: Option<&AircraftInfo>) -> String {
    let manufacturer = aircraft
        .and_then(|info| info.manufacturer.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match manufacturer {
        Some(manufacturer) => {
            let aircraft_type = aircraft
                .and_then(|info| info.aircraft_type.as_deref())
                .map(str::trim)
                .unwrap_or("");
            format!("{} {}", manufacturer, aircraft_type)
                .trim_end()
                .to_string()
        }
        None => UNKNOWN_AIRCRAFT.to_string(),
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SightingEvent {
    pub hex: String,
    #[serde(default)]
    pub aircraft: Option<AircraftInfo>,
}

impl SightingEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_key(&self.hex)
    }

    pub fn describe(&self) -> String {
        describe_aircraft(self.aircraft.as_ref())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeyQuery {
    pub hex: String,
}

impl KeyQuery {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_key(&self.hex)
    }
}

/// Response data for `record_sighting`.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SightingReceipt {
    pub session_id: String,
    pub sighting_count: u64,
    pub previous_session_ended_at: i64,
}

pub fn parse_sighting(params: Value) -> Result<SightingEvent, ErrorInfo> {
    let event: SightingEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("sighting payload is invalid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

pub fn parse_key_query(params: Value) -> Result<KeyQuery, ErrorInfo> {
    let query: KeyQuery = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("query payload is invalid JSON: {}", err),
        )
    })?;
    query.validate()?;
    Ok(query)
}

fn require_key(hex: &str) -> Result<(), ErrorInfo> {
    if hex.is_empty() {
        return Err(ErrorInfo::new("invalid_key", "hex is required"));
    }
    if hex.len() > MAX_KEY_LEN {
        return Err(ErrorInfo::new(
            "invalid_key",
            format!("hex must be {} characters or fewer", MAX_KEY_LEN),
        ));
    }
    Ok(())
}
