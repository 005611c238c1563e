//! Decrypted sensor payload: typed representation and field validation.
//!
//! Firmware sends a flat JSON object. `device_id` is mandatory; the sensor
//! channels are all optional because not every board carries every sensor.
//! Validation failures are collected per field so the ingest response can
//! surface the whole error map at once.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Field-name -> error messages, in stable (sorted) order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// A validated sensor event, ready for forwarding and persistence.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SensorEvent {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub smoke: Option<f64>,
    pub motion: Option<bool>,
}

/// Parse a decrypted JSON object into a [`SensorEvent`].
///
/// The caller has already established that `value` is a JSON object; this
/// checks the field-level rules: `device_id` present and a non-empty scalar,
/// numeric channels numeric if present, `motion` boolean-coercible if
/// present. Absent optional fields are fine; explicit `null` counts as
/// absent, matching how firmware omits idle channels.
pub fn parse_event(value: &Value) -> Result<SensorEvent, FieldErrors> {
    let mut errors = FieldErrors::new();

    let device_id = match value.get("device_id") {
        None | Some(Value::Null) => {
            push(&mut errors, "device_id", "device_id is required");
            String::new()
        }
        Some(v) => match scalar_to_string(v) {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                push(&mut errors, "device_id", "device_id must be a non-empty scalar");
                String::new()
            }
        },
    };

    let temperature = numeric_field(value, "temperature", &mut errors);
    let humidity = numeric_field(value, "humidity", &mut errors);
    let smoke = numeric_field(value, "smoke", &mut errors);
    let motion = boolean_field(value, "motion", &mut errors);

    if errors.is_empty() {
        Ok(SensorEvent {
            device_id,
            temperature,
            humidity,
            smoke,
            motion,
        })
    } else {
        Err(errors)
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

/// Scalar identifiers may arrive as strings or numbers depending on the
/// firmware build; normalize both to a string id.
fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric_field(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<f64> {
    match value.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) => Some(f),
            None => {
                push(errors, field, &format!("{field} must be numeric"));
                None
            }
        },
        // Numeric strings ("21.5") are accepted; anything else is an error.
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => Some(f),
            Err(_) => {
                push(errors, field, &format!("{field} must be numeric"));
                None
            }
        },
        Some(_) => {
            push(errors, field, &format!("{field} must be numeric"));
            None
        }
    }
}

fn boolean_field(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<bool> {
    match value.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => {
                push(errors, field, &format!("{field} must be a boolean"));
                None
            }
        },
        Some(Value::String(s)) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => {
                push(errors, field, &format!("{field} must be a boolean"));
                None
            }
        },
        Some(_) => {
            push(errors, field, &format!("{field} must be a boolean"));
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
