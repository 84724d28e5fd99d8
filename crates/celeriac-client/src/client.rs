//! Client facade

use crate::producer::TaskProducer;
use crate::result::AsyncResult;
use celeriac_broker::{BackendRegistry, Connector, ConnectorFactory};
use celeriac_core::{
    CeleriacConfig, ConnectionDescriptor, Error, Result, ResultMessage, TaskId, TaskOptions,
    TimeParam,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for one submission
#[derive(Debug, Clone)]
pub struct PostOptions {
    /// Routing, scheduling and extension options for the envelope
    pub task: TaskOptions,

    /// Return an [`AsyncResult`] for the task
    pub want_result: bool,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            task: TaskOptions::default(),
            want_result: true,
        }
    }
}

impl From<TaskOptions> for PostOptions {
    fn from(task: TaskOptions) -> Self {
        Self {
            task,
            ..Default::default()
        }
    }
}

impl PostOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing key
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.task = self.task.routing_key(routing_key);
        self
    }

    /// Set the retry count
    pub fn retries(mut self, retries: i64) -> Self {
        self.task = self.task.retries(retries);
        self
    }

    /// Set ETA for delayed execution
    pub fn eta(mut self, eta: impl Into<TimeParam>) -> Self {
        self.task = self.task.eta(eta);
        self
    }

    /// Set countdown for delayed execution
    pub fn countdown(mut self, seconds: u64) -> Self {
        self.task = self.task.countdown(seconds);
        self
    }

    /// Set expiry
    pub fn expires(mut self, expires: impl Into<TimeParam>) -> Self {
        self.task = self.task.expires(expires);
        self
    }

    /// Set an envelope extension field
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.task = self.task.extension(key, value);
        self
    }

    /// Fire and forget: do not return an [`AsyncResult`]
    pub fn no_result(mut self) -> Self {
        self.want_result = false;
        self
    }
}

/// Outcome of a successful submission
#[derive(Debug)]
pub enum Submitted {
    /// Handle to poll for the result
    Result(AsyncResult),
    /// Published without a result handle
    Sent(TaskId),
}

impl Submitted {
    /// The id of the submitted task
    pub fn task_id(&self) -> &TaskId {
        match self {
            Submitted::Result(result) => result.id(),
            Submitted::Sent(id) => id,
        }
    }

    /// The result handle, if one was requested
    pub fn into_result(self) -> Option<AsyncResult> {
        match self {
            Submitted::Result(result) => Some(result),
            Submitted::Sent(_) => None,
        }
    }
}

/// Celery client
///
/// Owns one connector for the task broker and one for the result backend.
/// Backends are chosen on construction; connections are opened on first use.
pub struct Celery {
    broker: Box<dyn Connector>,
    backend: Box<dyn Connector>,
    factory: Arc<dyn ConnectorFactory>,
}

impl std::fmt::Debug for Celery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Celery")
            .field("broker", &self.broker.kind())
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Celery {
    /// Client using one descriptor for tasks and results
    pub fn new(broker: ConnectionDescriptor) -> Result<Self> {
        let backend = broker.clone();
        Self::with_backend(broker, backend)
    }

    /// Client with a separate result backend
    pub fn with_backend(broker: ConnectionDescriptor, backend: ConnectionDescriptor) -> Result<Self> {
        Self::with_factory(broker, backend, Arc::new(BackendRegistry::new()))
    }

    /// Client opening its connectors through `factory`
    pub fn with_factory(
        broker: ConnectionDescriptor,
        backend: ConnectionDescriptor,
        factory: Arc<dyn ConnectorFactory>,
    ) -> Result<Self> {
        let broker = factory.create(&broker)?;
        let backend = factory.create(&backend)?;

        info!(
            broker = %broker.kind(),
            backend = %backend.kind(),
            "Celery client created for {}",
            broker.descriptor().endpoint()
        );

        Ok(Self {
            broker,
            backend,
            factory,
        })
    }

    /// Client from loaded configuration
    pub fn from_config(config: &CeleriacConfig) -> Result<Self> {
        Self::with_backend(config.broker.clone(), config.backend_descriptor().clone())
    }

    /// The task broker descriptor
    pub fn broker(&self) -> &ConnectionDescriptor {
        self.broker.descriptor()
    }

    /// The result backend descriptor
    pub fn backend(&self) -> &ConnectionDescriptor {
        self.backend.descriptor()
    }

    /// Connect to the task broker; no-op when already connected
    pub async fn connect(&mut self) -> Result<()> {
        self.broker.connect().await?;
        Ok(())
    }

    /// Submit a task
    ///
    /// `args` must serialize to a sequence (positional) or a map (keyword).
    pub async fn post_task<A: Serialize>(
        &mut self,
        task_name: &str,
        args: A,
        options: PostOptions,
    ) -> Result<Submitted> {
        let args = serde_json::to_value(args)
            .map_err(|e| Error::InvalidArguments(format!("arguments are not JSON-representable: {}", e)))?;
        let envelope = TaskProducer::new(self.broker.as_mut())
            .submit(task_name, args, &options.task)
            .await?;

        if !options.want_result {
            return Ok(Submitted::Sent(envelope.id));
        }

        let args = envelope.args_json();
        let result = AsyncResult::new(envelope.id, envelope.task, args, self.backend().clone())
            .with_factory(self.factory.clone());
        Ok(Submitted::Result(result))
    }

    /// Fetch the raw result message of a task once, without caching
    pub async fn get_async_result_message(
        &mut self,
        task_name: &str,
        task_id: &TaskId,
        remove: bool,
    ) -> Result<Option<ResultMessage>> {
        self.backend.connect().await?;
        let message = self.backend.fetch_result(task_id, remove).await?;
        debug!(task_id = %task_id, task_name, ready = message.is_some(), "Fetched result message");
        Ok(message)
    }

    /// Close both connectors
    pub async fn close(&mut self) -> Result<()> {
        self.broker.close().await?;
        self.backend.close().await?;
        Ok(())
    }
}
