//! Scheduler job identifiers.
//!
//! `submit_job` returns either a single integer id or, for multi-node jobs,
//! one dotted string id per node (`"1234.0"`, `"1234.1"`). Each node's id is
//! reduced to a [`CorrelationId`] by summing its dot-separated components,
//! which yields the numeric id the scheduler uses for that node in the event
//! feed and in its job URLs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::value::Value;

/// Identifier exactly as returned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchedulerJobId(String);

impl SchedulerJobId {
    /// Validate and wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        reduce(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reduce to the numeric id used in feed events.
    pub fn correlation(&self) -> CorrelationId {
        // Validated at construction
        CorrelationId(reduce(&self.0).unwrap_or_default())
    }

    /// Parse the return value of `submit_job`.
    ///
    /// An empty result (`0`, `""`, `[]`) yields an empty list; deciding
    /// whether that is an error is left to the caller.
    pub fn from_submit_response(value: &Value) -> Result<Vec<Self>, ProtocolError> {
        match value {
            Value::Int(id) if *id <= 0 => Ok(Vec::new()),
            Value::Int(id) => Ok(vec![Self(id.to_string())]),
            Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
            Value::String(s) => Ok(vec![Self::new(s.trim())?]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Self::new(s.trim()),
                    Value::Int(id) if *id > 0 => Ok(Self(id.to_string())),
                    other => Err(ProtocolError::InvalidJobId(format!(
                        "unexpected {} in submit response",
                        other.type_name()
                    ))),
                })
                .collect(),
            Value::Nil | Value::Bool(false) => Ok(Vec::new()),
            other => Err(ProtocolError::InvalidJobId(format!(
                "unexpected {} in submit response",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for SchedulerJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric key correlating a submitted node with feed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for CorrelationId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        reduce(s).map(Self)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sum the dot-separated numeric components of an identifier.
fn reduce(raw: &str) -> Result<u64, ProtocolError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProtocolError::InvalidJobId("empty identifier".to_string()));
    }
    raw.split('.').try_fold(0u64, |acc, part| {
        let n = part
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidJobId(raw.to_string()))?;
        acc.checked_add(n)
            .ok_or_else(|| ProtocolError::InvalidJobId(raw.to_string()))
    })
}
