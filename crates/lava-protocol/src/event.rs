//! Event-feed messages.
//!
//! The scheduler publishes multipart messages of the form
//! `(topic, uuid, datetime, username, data)` where `data` is a JSON object
//! such as `{"job": 1234, "status": "Complete", ...}`. Newer schedulers send
//! `state`/`health` pairs instead of `status`; both shapes are accepted.

use serde_json::Value as Json;

use crate::error::ProtocolError;
use crate::job_id::CorrelationId;
use crate::status::JobStatus;

/// Raw message as received from the feed, one entry per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub frames: Vec<Vec<u8>>,
}

impl FeedMessage {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self { frames }
    }

    /// Message made of a data frame only.
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            frames: vec![data.into()],
        }
    }

    /// First frame, conventionally the topic.
    pub fn topic(&self) -> Option<&str> {
        self.frames
            .first()
            .and_then(|frame| std::str::from_utf8(frame).ok())
    }

    /// Last frame, which carries the JSON payload.
    pub fn payload(&self) -> Option<&[u8]> {
        self.frames.last().map(Vec::as_slice)
    }
}

/// A decoded status change for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEvent {
    pub job: CorrelationId,
    pub status: JobStatus,
}

impl JobEvent {
    pub fn new(job: impl Into<CorrelationId>, status: JobStatus) -> Self {
        Self {
            job: job.into(),
            status,
        }
    }

    /// Decode a feed message.
    pub fn decode(message: &FeedMessage) -> Result<Self, ProtocolError> {
        let payload = message
            .payload()
            .ok_or_else(|| ProtocolError::MalformedEvent("empty message".to_string()))?;
        let data: Json = serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::MalformedEvent(format!("payload is not JSON: {}", e)))?;
        Self::from_json(&data)
    }

    /// Decode the JSON payload of a feed message.
    pub fn from_json(data: &Json) -> Result<Self, ProtocolError> {
        let object = data
            .as_object()
            .ok_or_else(|| ProtocolError::MalformedEvent("payload is not an object".to_string()))?;

        let job = match object.get("job") {
            Some(Json::Number(n)) => n
                .as_u64()
                .map(CorrelationId::new)
                .ok_or_else(|| ProtocolError::MalformedEvent(format!("bad job id {}", n)))?,
            Some(Json::String(s)) => s.parse::<CorrelationId>()?,
            Some(other) => {
                return Err(ProtocolError::MalformedEvent(format!("bad job id {}", other)));
            }
            None => return Err(ProtocolError::MalformedEvent("missing job".to_string())),
        };

        let field = |name: &str| object.get(name).and_then(Json::as_str);
        let status = match (field("status"), field("state")) {
            (Some(status), _) => status.parse::<JobStatus>()?,
            (None, Some(state)) => JobStatus::from_state(state, field("health"))?,
            (None, None) => {
                return Err(ProtocolError::MalformedEvent(
                    "missing status".to_string(),
                ))
            }
        };

        Ok(Self { job, status })
    }
}
