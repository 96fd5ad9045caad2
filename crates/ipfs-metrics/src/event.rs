// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::{Map, Value};

use crate::errors::EncodeError;
use crate::tag::Tag;

pub const TIME_KEY: &str = "time";
pub const SYSTEM_KEY: &str = "system";
pub const DURATION_KEY: &str = "duration";

/// Message keys promoted to line protocol tags, in emission order.
pub const MESSAGE_TAGS: [&str; 4] = ["session", "subsystem", "event", "requestId"];
/// Message keys emitted as line protocol fields.
pub const MESSAGE_FIELDS: [&str; 1] = [DURATION_KEY];

/// One decoded log record and the tags collected for it on its way through a proxy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogEvent {
    /// Open schema payload as received from the daemon
    pub message: Map<String, Value>,
    pub tags: Vec<Tag>,
}

impl LogEvent {
    pub fn new(message: Map<String, Value>) -> Self {
        LogEvent {
            message,
            tags: Vec::new(),
        }
    }

    pub fn add_tag(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    pub fn add_tags(&mut self, tags: &[Tag]) {
        self.tags.extend_from_slice(tags);
    }

    /// Sets `duration` to 0 when the daemon left it out. Line protocol needs at
    /// least one field.
    pub fn default_duration(&mut self) {
        if matches!(self.message.get(DURATION_KEY), None | Some(Value::Null)) {
            self.message.insert(DURATION_KEY.to_string(), Value::from(0));
        }
    }

    /// Typed view of a well-known key.
    pub fn field(&self, key: &str) -> Result<FieldValue<'_>, EncodeError> {
        FieldValue::from_json(key, self.message.get(key))
    }
}

/// The shapes the codec accepts for well-known message keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    Absent,
}

impl<'a> FieldValue<'a> {
    pub fn from_json(key: &str, value: Option<&'a Value>) -> Result<Self, EncodeError> {
        match value {
            None | Some(Value::Null) => Ok(FieldValue::Absent),
            Some(Value::String(s)) => Ok(FieldValue::Str(s)),
            Some(Value::Number(n)) => {
                if let Some(u) = n.as_u64() {
                    Ok(FieldValue::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Float(f))
                } else {
                    Err(unsupported(key, n))
                }
            }
            Some(other) => Err(unsupported(key, other)),
        }
    }
}

fn unsupported(key: &str, value: impl std::fmt::Display) -> EncodeError {
    EncodeError::UnsupportedType {
        key: key.to_string(),
        value: value.to_string(),
    }
}
