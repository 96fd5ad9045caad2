// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encoders turning a [`LogEvent`] into sink payloads.
//!
//! Line protocol is the preferred encoding for time-series sinks:
//!
//! ```text
//! measurement[,tag1=v1,...,tagN=vN] field1=v1[,...,fieldM=vM] timestamp\n
//! ```
//!
//! For example:
//!
//! ```text
//! dht,event=findPeerSingleBegin,nodeId=QmcJ9RHiEoa1WYeaFAEHVgjc41aXfD52WDEFLZrEcQvbPR duration=0 1510956550223924627
//! swarm2,event=swarmDialAttemptSync,nodeId=QmcJ9RHiEoa1WYeaFAEHVgjc41aXfD52WDEFLZrEcQvbPR duration=1129297969.000000 1510956550080102777
//! ```

use chrono::DateTime;

use crate::config::Format;
use crate::errors::EncodeError;
use crate::event::{FieldValue, LogEvent, MESSAGE_FIELDS, MESSAGE_TAGS, SYSTEM_KEY, TIME_KEY};

// A bare trailing `\` would escape the separator that follows it.
const MEASUREMENT_SPECIAL: &[char] = &['\\', ',', ' '];
const KEY_SPECIAL: &[char] = &['\\', ',', '=', ' '];

/// Encodes an event with the encoder selected by `format`.
pub fn encode(format: Format, event: &mut LogEvent) -> Result<Vec<u8>, EncodeError> {
    match format {
        Format::Json => encode_json(event),
        Format::LineProtocol => encode_line_protocol(event),
    }
}

/// Serializes the event message as a JSON object. Tags are not part of the body.
pub fn encode_json(event: &mut LogEvent) -> Result<Vec<u8>, EncodeError> {
    event.default_duration();
    serde_json::to_vec(&event.message).map_err(|e| EncodeError::Json(e.to_string()))
}

/// Serializes the event as a single newline-terminated line protocol entry.
pub fn encode_line_protocol(event: &mut LogEvent) -> Result<Vec<u8>, EncodeError> {
    event.default_duration();

    let measurement = match event.field(SYSTEM_KEY)? {
        FieldValue::Str(s) if !s.is_empty() => s,
        FieldValue::Str(_) | FieldValue::Absent => {
            return Err(EncodeError::MissingKey(SYSTEM_KEY))
        }
        _ => {
            return Err(EncodeError::UnsupportedType {
                key: SYSTEM_KEY.to_string(),
                value: event.message[SYSTEM_KEY].to_string(),
            })
        }
    };
    let tags = line_protocol_tags(event)?;
    let fields = line_protocol_fields(event)?;
    let timestamp = line_protocol_time(event)?;

    let mut line = String::with_capacity(64 + tags.len() * 32);
    escape_into(&mut line, measurement, MEASUREMENT_SPECIAL);
    for tag in &tags {
        line.push(',');
        line.push_str(tag);
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&timestamp.to_string());
    line.push('\n');
    Ok(line.into_bytes())
}

/// Well-known message tags first, then the event's own tags in order.
fn line_protocol_tags(event: &LogEvent) -> Result<Vec<String>, EncodeError> {
    let mut tags = Vec::with_capacity(MESSAGE_TAGS.len() + event.tags.len());
    for key in MESSAGE_TAGS {
        match event.field(key)? {
            FieldValue::Absent => {}
            FieldValue::Str("") => {}
            FieldValue::Str(value) => tags.push(key_value(key, value)),
            _ => {
                return Err(EncodeError::UnsupportedType {
                    key: key.to_string(),
                    value: event.message[key].to_string(),
                })
            }
        }
    }
    for tag in &event.tags {
        tags.push(key_value(&tag.name, &tag.value));
    }
    Ok(tags)
}

fn line_protocol_fields(event: &LogEvent) -> Result<Vec<String>, EncodeError> {
    let mut fields = Vec::with_capacity(MESSAGE_FIELDS.len());
    for key in MESSAGE_FIELDS {
        if let Some(value) = stringify_field(key, event.field(key)?)? {
            let mut field = String::new();
            escape_into(&mut field, key, KEY_SPECIAL);
            field.push('=');
            field.push_str(&value);
            fields.push(field);
        }
    }
    Ok(fields)
}

fn line_protocol_time(event: &LogEvent) -> Result<i64, EncodeError> {
    let raw = match event.field(TIME_KEY)? {
        FieldValue::Str(s) => s,
        FieldValue::Absent => return Err(EncodeError::MissingKey(TIME_KEY)),
        _ => {
            return Err(EncodeError::InvalidTime {
                value: event.message[TIME_KEY].to_string(),
                reason: "not a string".to_string(),
            })
        }
    };
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| EncodeError::InvalidTime {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    parsed
        .timestamp_nanos_opt()
        .ok_or_else(|| EncodeError::InvalidTime {
            value: raw.to_string(),
            reason: "out of range for nanosecond timestamps".to_string(),
        })
}

/// Integers render as-is, floats as fixed point with six decimals.
fn stringify_field(key: &str, value: FieldValue<'_>) -> Result<Option<String>, EncodeError> {
    match value {
        FieldValue::Absent => Ok(None),
        FieldValue::Int(i) => Ok(Some(i.to_string())),
        FieldValue::UInt(u) => Ok(Some(u.to_string())),
        FieldValue::Float(f) => Ok(Some(format!("{f:.6}"))),
        FieldValue::Str(s) => Err(EncodeError::UnsupportedType {
            key: key.to_string(),
            value: format!("{s:?}"),
        }),
    }
}

fn key_value(key: &str, value: &str) -> String {
    let mut out = String::with_capacity(key.len() + value.len() + 1);
    escape_into(&mut out, key, KEY_SPECIAL);
    out.push('=');
    escape_into(&mut out, value, KEY_SPECIAL);
    out
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
