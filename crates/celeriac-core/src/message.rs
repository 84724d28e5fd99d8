//! Wire-level message types: publish properties and result messages

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The only serialization accepted on either side of the broker
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content encoding of published envelopes
pub const CONTENT_ENCODING_UTF8: &str = "UTF-8";

/// Status value reported by workers for a successful task
pub const SUCCESS_STATUS: &str = "SUCCESS";

/// AMQP delivery mode for persistent messages
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Delivery properties accompanying a published envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    pub content_type: String,
    pub content_encoding: String,
    /// `Some(2)` when the broker should persist the message
    pub delivery_mode: Option<u8>,
    pub headers: BTreeMap<String, String>,
}

impl Default for PublishProperties {
    fn default() -> Self {
        Self {
            content_type: CONTENT_TYPE_JSON.to_string(),
            content_encoding: CONTENT_ENCODING_UTF8.to_string(),
            delivery_mode: None,
            headers: BTreeMap::new(),
        }
    }
}

impl PublishProperties {
    /// Properties for a JSON envelope
    pub fn json() -> Self {
        Self::default()
    }

    /// Request persistent delivery
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.delivery_mode = persistent.then_some(DELIVERY_MODE_PERSISTENT);
        self
    }

    /// Add a message header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Task state as reported by the result backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// No result observed yet
    Pending,
    Received,
    Started,
    Success,
    Failure,
    Retry,
    Revoked,
    /// Application-defined state
    Custom(String),
}

impl TaskState {
    /// Map a worker status string onto a state
    pub fn from_status(status: &str) -> Self {
        match status {
            "PENDING" => TaskState::Pending,
            "RECEIVED" => TaskState::Received,
            "STARTED" => TaskState::Started,
            SUCCESS_STATUS => TaskState::Success,
            "FAILURE" => TaskState::Failure,
            "RETRY" => TaskState::Retry,
            "REVOKED" => TaskState::Revoked,
            other => TaskState::Custom(other.to_string()),
        }
    }

    /// Check if this state ends the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure | TaskState::Revoked)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Received => write!(f, "RECEIVED"),
            TaskState::Started => write!(f, "STARTED"),
            TaskState::Success => write!(f, "SUCCESS"),
            TaskState::Failure => write!(f, "FAILURE"),
            TaskState::Retry => write!(f, "RETRY"),
            TaskState::Revoked => write!(f, "REVOKED"),
            TaskState::Custom(status) => write!(f, "{}", status),
        }
    }
}

/// Decoded body of a result message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    pub status: String,

    /// Return value on success, exception description on failure
    #[serde(default)]
    pub result: serde_json::Value,

    #[serde(default)]
    pub traceback: Option<String>,

    /// Remaining fields (task_id, children, date_done, ...)
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultBody {
    /// Whether the worker reported success
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }

    /// The reported state
    pub fn state(&self) -> TaskState {
        TaskState::from_status(&self.status)
    }
}

/// A result message read from the result backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMessage {
    /// Content type reported by the transport
    pub content_type: Option<String>,

    /// Raw message body
    pub body: Vec<u8>,
}

impl ResultMessage {
    /// Create a result message
    pub fn new(content_type: Option<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    /// Create a JSON result message
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Some(CONTENT_TYPE_JSON.to_string()), body)
    }

    /// Check the content type against the expected serialization
    pub fn validate(&self) -> Result<()> {
        match self.content_type.as_deref() {
            Some(CONTENT_TYPE_JSON) => Ok(()),
            other => Err(Error::MalformedResult(format!(
                "response was not encoded using JSON - found {} - check the worker's result serializer setting",
                other.unwrap_or("no content type")
            ))),
        }
    }

    /// Validate and decode the body
    pub fn decode(&self) -> Result<ResultBody> {
        self.validate()?;
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::MalformedResult(format!("undecodable result body: {}", e)))
    }

    /// Body as text, lossily
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
