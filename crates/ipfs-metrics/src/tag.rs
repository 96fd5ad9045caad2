// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `name=value` tags attached to every event of a source.
//!
//! `,` and `=` separate tags in line protocol, and a trailing `\` would escape
//! whatever separator follows it, so tags containing them are rejected up front.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TagError;

/// Name of the tag every proxy attaches to identify the daemon it reads from.
pub const NODE_ID_TAG: &str = "nodeId";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Value", alias = "value")]
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn node_id(node: impl Into<String>) -> Self {
        Tag::new(NODE_ID_TAG, node)
    }

    /// Checks the canonical `name=value` form of this tag.
    pub fn validate(&self) -> Result<(), TagError> {
        let canonical = self.to_string();
        if is_valid_tag(&canonical) {
            Ok(())
        } else {
            Err(TagError::Invalid(canonical))
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_valid_tag(s) {
            return Err(TagError::Invalid(s.to_string()));
        }
        match s.split_once('=') {
            Some((name, value)) => Ok(Tag::new(name, value)),
            None => Err(TagError::Invalid(s.to_string())),
        }
    }
}

/// Returns true if `maybe_tag` has exactly one `=` with non-empty sides, no `,`
/// and no trailing `\`.
pub fn is_valid_tag(maybe_tag: &str) -> bool {
    if maybe_tag.contains(',') || maybe_tag.ends_with('\\') {
        return false;
    }
    let mut parts = maybe_tag.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(value), None) => !name.is_empty() && !value.is_empty(),
        _ => false,
    }
}

/// Parses a list of `name=value` arguments, failing on the first invalid one.
pub fn parse_tags<S: AsRef<str>>(tags: &[S]) -> Result<Vec<Tag>, TagError> {
    tags.iter().map(|t| t.as_ref().parse()).collect()
}
