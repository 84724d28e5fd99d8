//! Task identifiers, envelope options and envelope building

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Envelope keys the producer owns; extensions may not override them
const RESERVED_KEYS: [&str; 4] = ["id", "task", "args", "kwargs"];

/// Unique identifier for a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a task ID from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the AMQP queue (and routing key) the worker replies on
    pub fn result_queue(&self) -> String {
        self.0.replace('-', "")
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Arguments after classification
#[derive(Debug, Clone, PartialEq)]
pub enum TaskArguments {
    /// Ordered positional arguments
    Positional(Vec<Value>),
    /// Keyword arguments
    Keyword(Map<String, Value>),
}

impl TaskArguments {
    /// Classify a caller-supplied argument container
    ///
    /// Arrays, `null`, and objects whose keys are exactly `"0"..="n-1"` are
    /// positional; any other object is keyword. Mixed shapes land on keyword.
    pub fn classify(args: Value) -> Result<Self> {
        match args {
            Value::Null => Ok(TaskArguments::Positional(Vec::new())),
            Value::Array(values) => Ok(TaskArguments::Positional(values)),
            Value::Object(mut map) => {
                let dense = (0..map.len()).all(|i| map.contains_key(&i.to_string()));
                if dense {
                    let values = (0..map.len())
                        .filter_map(|i| map.remove(&i.to_string()))
                        .collect();
                    Ok(TaskArguments::Positional(values))
                } else {
                    Ok(TaskArguments::Keyword(map))
                }
            }
            other => Err(Error::InvalidArguments(format!(
                "args should be an array or an object, got {}",
                other
            ))),
        }
    }

    /// Split into the envelope's `args` and `kwargs`
    pub fn into_parts(self) -> (Vec<Value>, Map<String, Value>) {
        match self {
            TaskArguments::Positional(args) => (args, Map::new()),
            TaskArguments::Keyword(kwargs) => (Vec::new(), kwargs),
        }
    }
}

/// A point in time for `eta` / `expires`
#[derive(Debug, Clone, PartialEq)]
pub enum TimeParam {
    /// Seconds since the Unix epoch
    Timestamp(f64),
    /// Caller-formatted timestamp, validated but sent as given
    Text(String),
    /// An exact instant
    At(DateTime<Utc>),
}

impl From<f64> for TimeParam {
    fn from(secs: f64) -> Self {
        TimeParam::Timestamp(secs)
    }
}

impl From<i64> for TimeParam {
    fn from(secs: i64) -> Self {
        TimeParam::Timestamp(secs as f64)
    }
}

impl From<&str> for TimeParam {
    fn from(text: &str) -> Self {
        TimeParam::Text(text.to_string())
    }
}

impl From<String> for TimeParam {
    fn from(text: String) -> Self {
        TimeParam::Text(text)
    }
}

impl From<DateTime<Utc>> for TimeParam {
    fn from(at: DateTime<Utc>) -> Self {
        TimeParam::At(at)
    }
}

impl TimeParam {
    /// Read a time parameter out of a loosely typed extension value
    pub fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(TimeParam::Timestamp)
                .ok_or_else(|| invalid_date(field, "number out of range")),
            Value::String(s) => Ok(TimeParam::Text(s.clone())),
            other => Err(invalid_date(field, &format!("expected timestamp, got {}", other))),
        }
    }

    /// Render the parameter in envelope form
    pub fn normalize(&self, field: &str) -> Result<String> {
        match self {
            TimeParam::Timestamp(secs) => {
                if !secs.is_finite() {
                    return Err(invalid_date(field, "timestamp is not finite"));
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                DateTime::<Utc>::from_timestamp(whole as i64, nanos)
                    .map(format_timestamp)
                    .ok_or_else(|| invalid_date(field, "timestamp out of range"))
            }
            TimeParam::Text(text) => {
                if is_calendar_date(text) {
                    Ok(text.clone())
                } else {
                    Err(invalid_date(field, &format!("`{}` is not a valid date", text)))
                }
            }
            TimeParam::At(at) => Ok(format_timestamp(*at)),
        }
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn is_calendar_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

fn invalid_date(field: &str, reason: &str) -> Error {
    Error::InvalidDateParameter {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Loose truthiness for flags that arrive untyped
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Options for a single task submission
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Routing key for this submission, defaults to the descriptor binding
    pub routing_key: Option<String>,

    /// Retry count; negative values clamp to zero
    pub retries: i64,

    /// Execute no earlier than this
    pub eta: Option<TimeParam>,

    /// Execute after this many seconds from now (ignored when `eta` is set)
    pub countdown: Option<u64>,

    /// Discard the task after this
    pub expires: Option<TimeParam>,

    /// Extra envelope fields (taskset, chord, utc, callbacks, errbacks, ...)
    pub extensions: Map<String, Value>,
}

impl TaskOptions {
    /// Create new task options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing key
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// Set the retry count
    pub fn retries(mut self, retries: i64) -> Self {
        self.retries = retries;
        self
    }

    /// Set ETA for delayed execution
    pub fn eta(mut self, eta: impl Into<TimeParam>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    /// Set countdown for delayed execution
    pub fn countdown(mut self, seconds: u64) -> Self {
        self.countdown = Some(seconds);
        self
    }

    /// Set expiry
    pub fn expires(mut self, expires: impl Into<TimeParam>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    /// Set the UTC flag
    pub fn utc(self, utc: bool) -> Self {
        self.extension("utc", utc)
    }

    /// Link the task to a task set
    pub fn taskset(self, id: impl Into<String>) -> Self {
        self.extension("taskset", id.into())
    }

    /// Link the task to a chord
    pub fn chord(self, id: impl Into<String>) -> Self {
        self.extension("chord", id.into())
    }

    /// Tasks to run on success
    pub fn callbacks<S: Into<String>>(self, names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<Value> = names.into_iter().map(|n| Value::String(n.into())).collect();
        self.extension("callbacks", names)
    }

    /// Tasks to run on failure
    pub fn errbacks<S: Into<String>>(self, names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<Value> = names.into_iter().map(|n| Value::String(n.into())).collect();
        self.extension("errbacks", names)
    }

    /// Set an arbitrary envelope field
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// The task-submission document published to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,

    /// Task name, `module.function` style
    pub task: String,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Map<String, Value>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Forward-compatible extension fields
    #[serde(default, flatten)]
    pub extensions: Map<String, Value>,
}

impl TaskEnvelope {
    /// Build a fresh envelope with a newly generated id
    pub fn build(task_name: &str, args: Value, options: &TaskOptions) -> Result<Self> {
        Self::build_with_id(TaskId::new(), task_name, args, options)
    }

    /// Build an envelope with a caller-chosen id
    pub fn build_with_id(
        id: TaskId,
        task_name: &str,
        args: Value,
        options: &TaskOptions,
    ) -> Result<Self> {
        if task_name.trim().is_empty() {
            return Err(Error::InvalidArguments("task name must not be empty".to_string()));
        }

        let (args, kwargs) = TaskArguments::classify(args)?.into_parts();

        let mut retries = options.retries;
        let mut eta = options.eta.clone();
        let mut expires = options.expires.clone();
        let mut extensions = Map::new();

        for (key, value) in &options.extensions {
            match key.as_str() {
                k if RESERVED_KEYS.contains(&k) => {
                    return Err(Error::InvalidArguments(format!(
                        "extension `{}` would overwrite an envelope field",
                        k
                    )));
                }
                "retries" => {
                    retries = value.as_i64().ok_or_else(|| {
                        Error::InvalidArguments(format!("retries must be an integer, got {}", value))
                    })?;
                }
                "eta" => {
                    if eta.is_none() {
                        eta = Some(TimeParam::from_value("eta", value)?);
                    }
                }
                "expires" => {
                    if expires.is_none() {
                        expires = Some(TimeParam::from_value("expires", value)?);
                    }
                }
                "taskset" | "chord" => {
                    if let Some(id) = coerce_string(value) {
                        extensions.insert(key.clone(), Value::String(id));
                    }
                }
                "utc" => {
                    extensions.insert(key.clone(), Value::Bool(truthy(value)));
                }
                "callbacks" | "errbacks" => {
                    if let Some(names) = validate_callbacks(key, value)? {
                        extensions.insert(key.clone(), names);
                    }
                }
                _ => {
                    extensions.insert(key.clone(), value.clone());
                }
            }
        }

        if eta.is_none() {
            if let Some(countdown) = options.countdown {
                eta = Some(TimeParam::At(countdown_eta(countdown)?));
            }
        }

        Ok(Self {
            id,
            task: task_name.to_string(),
            args,
            kwargs,
            retries: retries.clamp(0, u32::MAX as i64) as u32,
            eta: eta.map(|t| t.normalize("eta")).transpose()?,
            expires: expires.map(|t| t.normalize("expires")).transpose()?,
            extensions,
        })
    }

    /// Serialize for the broker
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an envelope
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The arguments rendered as JSON, for diagnostics
    pub fn args_json(&self) -> String {
        if self.kwargs.is_empty() {
            Value::Array(self.args.clone()).to_string()
        } else {
            Value::Object(self.kwargs.clone()).to_string()
        }
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn validate_callbacks(field: &str, value: &Value) -> Result<Option<Value>> {
    let invalid = |reason: String| Error::InvalidCallbackParameter {
        field: field.to_string(),
        reason,
    };

    match value {
        Value::Null => Ok(None),
        Value::Array(items) => {
            if let Some(bad) = items.iter().find(|item| !item.is_string()) {
                return Err(invalid(format!("expected task names, found {}", bad)));
            }
            Ok(Some(value.clone()))
        }
        other => Err(invalid(format!("expected a list of task names, got {}", other))),
    }
}

/// Absolute time `seconds` from now
fn countdown_eta(seconds: u64) -> Result<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .ok_or_else(|| Error::InvalidDateParameter {
            field: "countdown".to_string(),
            reason: format!("{} seconds from now is out of range", seconds),
        })
}
