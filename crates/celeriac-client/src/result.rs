//! AsyncResult: the handle a caller polls for a task's outcome
//!
//! State is derived from a cached result body:
//! - no body: `PENDING`
//! - body with status `SUCCESS`: successful
//! - any other status: failed
//!
//! Once a body is cached it is never fetched again. The connector is opened
//! lazily on first use, which is also what happens after deserialization.

use crate::observe;
use celeriac_broker::{BackendRegistry, Connector, ConnectorError, ConnectorFactory};
use celeriac_core::{ConnectionDescriptor, Error, Result, ResultBody, TaskId, TaskState};
use celeriac_telemetry::{log_poll_timeout, log_result_ready, FetchOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default deadline for [`AsyncResult::get`]
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Default spacing between polls in [`AsyncResult::get`]
pub const DEFAULT_GET_INTERVAL: Duration = Duration::from_millis(500);

/// Handle to the result of a submitted task
#[derive(Serialize, Deserialize)]
pub struct AsyncResult {
    task_id: TaskId,

    task_name: String,

    /// Arguments rendered as JSON, for the timeout message
    args: String,

    /// Result backend
    descriptor: ConnectionDescriptor,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<ResultBody>,

    #[serde(skip)]
    connector: Option<Box<dyn Connector>>,

    #[serde(skip)]
    factory: Option<Arc<dyn ConnectorFactory>>,
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("state", &self.state())
            .field("connected", &self.connector.as_ref().map(|c| c.is_connected()))
            .finish()
    }
}

impl AsyncResult {
    /// Create a handle for a task on the given result backend
    pub fn new(
        task_id: TaskId,
        task_name: impl Into<String>,
        args: impl Into<String>,
        descriptor: ConnectionDescriptor,
    ) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            args: args.into(),
            descriptor,
            body: None,
            connector: None,
            factory: None,
        }
    }

    /// Use this connector instead of opening one
    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Open connectors through this factory instead of the default registry
    pub fn with_factory(mut self, factory: Arc<dyn ConnectorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// The task id
    pub fn id(&self) -> &TaskId {
        &self.task_id
    }

    /// The task name
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// The result backend descriptor
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    async fn connector(&mut self) -> Result<&mut dyn Connector> {
        let connector = match self.connector.take() {
            Some(connector) => connector,
            None => match &self.factory {
                Some(factory) => factory.create(&self.descriptor)?,
                None => BackendRegistry::new().create(&self.descriptor)?,
            },
        };

        let connector = self.connector.insert(connector);
        connector.connect().await?;
        Ok(connector.as_mut())
    }

    /// Check whether the result has arrived
    ///
    /// Makes at most one fetch; after the first success the cached body
    /// answers without touching the broker.
    pub async fn is_ready(&mut self) -> Result<bool> {
        if self.body.is_some() {
            return Ok(true);
        }

        let task_id = self.task_id.clone();
        let remove = self.descriptor.remove_after_read();
        let connector = self.connector().await?;
        let backend = connector.kind();

        let message = match connector.fetch_result(&task_id, remove).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                observe::result_fetched(backend.as_str(), FetchOutcome::NotReady);
                return Ok(false);
            }
            Err(ConnectorError::Malformed(reason)) => {
                observe::result_fetched(backend.as_str(), FetchOutcome::Malformed);
                return Err(Error::MalformedResult(reason));
            }
            Err(e) => return Err(e.into()),
        };

        let body = match message.decode() {
            Ok(body) => body,
            Err(e) => {
                observe::result_fetched(backend.as_str(), FetchOutcome::Malformed);
                return Err(e);
            }
        };

        observe::result_fetched(backend.as_str(), FetchOutcome::Ready);
        log_result_ready!(task_id, body.status);
        self.body = Some(body);
        Ok(true)
    }

    /// Alias of [`is_ready`](Self::is_ready)
    pub async fn ready(&mut self) -> Result<bool> {
        self.is_ready().await
    }

    fn cached(&self, accessor: &'static str) -> Result<&ResultBody> {
        self.body.as_ref().ok_or(Error::PrematureAccess(accessor))
    }

    /// Status string reported by the worker
    pub fn status(&self) -> Result<&str> {
        Ok(&self.cached("status")?.status)
    }

    /// Value returned by the task
    pub fn result(&self) -> Result<&Value> {
        Ok(&self.cached("result")?.result)
    }

    /// Traceback of a failed task
    pub fn traceback(&self) -> Result<Option<&str>> {
        Ok(self.cached("traceback")?.traceback.as_deref())
    }

    /// Current state, `PENDING` until a result has been fetched
    pub fn state(&self) -> TaskState {
        self.body
            .as_ref()
            .map(ResultBody::state)
            .unwrap_or(TaskState::Pending)
    }

    /// The result if it has arrived, without waiting
    pub async fn result_if_ready(&mut self) -> Result<Option<&Value>> {
        if self.is_ready().await? {
            Ok(self.body.as_ref().map(|body| &body.result))
        } else {
            Ok(None)
        }
    }

    /// Ready, and the task succeeded
    pub async fn is_success(&mut self) -> Result<bool> {
        Ok(self.is_ready().await? && self.cached("status")?.is_success())
    }

    /// Alias of [`is_success`](Self::is_success)
    pub async fn successful(&mut self) -> Result<bool> {
        self.is_success().await
    }

    /// Ready, and the task did not succeed
    pub async fn failed(&mut self) -> Result<bool> {
        Ok(self.is_ready().await? && !self.cached("status")?.is_success())
    }

    /// Poll until the result arrives or `timeout` passes
    ///
    /// The deadline is wall-clock; a slow fetch counts against it. A timeout
    /// too large to represent (such as `Duration::MAX`) never expires.
    pub async fn get(&mut self, timeout: Duration, interval: Duration) -> Result<Value> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if self.is_ready().await? {
                return self.result().cloned();
            }

            let Some(deadline) = deadline else {
                tokio::time::sleep(interval).await;
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                observe::poll_timed_out(&self.task_name);
                log_poll_timeout!(self.task_id, self.task_name, timeout);
                return Err(Error::Timeout {
                    task_name: self.task_name.clone(),
                    args: self.args.clone(),
                    timeout,
                });
            }

            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    /// [`get`](Self::get) with a 10 second deadline polled every half second
    pub async fn get_with_defaults(&mut self) -> Result<Value> {
        self.get(DEFAULT_GET_TIMEOUT, DEFAULT_GET_INTERVAL).await
    }

    /// Alias of [`get`](Self::get)
    pub async fn wait(&mut self, timeout: Duration, interval: Duration) -> Result<Value> {
        self.get(timeout, interval).await
    }

    /// Does nothing; results expire on the broker side
    pub fn forget(&self) {
        debug!(task_id = %self.task_id, "forget is a no-op");
    }

    /// Does nothing; worker-side revocation is not part of this client
    pub fn revoke(&self) {
        debug!(task_id = %self.task_id, "revoke is a no-op");
    }

    /// Release the connector, if one is open
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut connector) = self.connector.take() {
            connector.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use celeriac_broker::ConnectorResult;
    use celeriac_core::{BackendKind, PublishProperties, ResultMessage};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed script of fetch outcomes
    struct ScriptedConnector {
        descriptor: ConnectionDescriptor,
        script: VecDeque<Option<ResultMessage>>,
        fetches: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Option<ResultMessage>>) -> (Self, Arc<AtomicUsize>) {
            let fetches = Arc::new(AtomicUsize::new(0));
            let connector = Self {
                descriptor: ConnectionDescriptor::new("localhost", "", "", ""),
                script: script.into(),
                fetches: fetches.clone(),
            };
            (connector, fetches)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn kind(&self) -> BackendKind {
            BackendKind::Redis
        }

        fn descriptor(&self) -> &ConnectionDescriptor {
            &self.descriptor
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn connect(&mut self) -> ConnectorResult<()> {
            Ok(())
        }

        async fn publish(&mut self, _: &str, _: &[u8], _: &PublishProperties) -> ConnectorResult<bool> {
            Ok(true)
        }

        async fn fetch_result(&mut self, _: &TaskId, _: bool) -> ConnectorResult<Option<ResultMessage>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.script.pop_front().flatten())
        }
    }

    fn handle(script: Vec<Option<ResultMessage>>) -> (AsyncResult, Arc<AtomicUsize>) {
        let (connector, fetches) = ScriptedConnector::new(script);
        let result = AsyncResult::new(
            TaskId::new(),
            "tasks.add",
            "[2,2]",
            ConnectionDescriptor::new("localhost", "", "", ""),
        )
        .with_connector(Box::new(connector));
        (result, fetches)
    }

    fn success(value: Value) -> Option<ResultMessage> {
        Some(ResultMessage::json(
            json!({"status": "SUCCESS", "result": value}).to_string(),
        ))
    }

    #[tokio::test]
    async fn test_pending_until_fetched() {
        let (mut result, fetches) = handle(vec![None]);
        assert_eq!(result.state(), TaskState::Pending);
        assert!(matches!(result.status(), Err(Error::PrematureAccess("status"))));
        assert!(matches!(result.result(), Err(Error::PrematureAccess("result"))));
        assert!(matches!(result.traceback(), Err(Error::PrematureAccess("traceback"))));

        assert!(!result.is_ready().await.unwrap());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(result.result_if_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_result_is_not_refetched() {
        let (mut result, fetches) = handle(vec![success(json!(4))]);

        assert!(result.is_ready().await.unwrap());
        for _ in 0..5 {
            assert!(result.is_ready().await.unwrap());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(result.status().unwrap(), "SUCCESS");
        assert_eq!(result.result().unwrap(), &json!(4));
        assert_eq!(result.state(), TaskState::Success);
    }

    #[tokio::test]
    async fn test_malformed_result_is_an_error() {
        let message = ResultMessage::new(Some("application/x-python-serialize".into()), b"garbage".to_vec());
        let (mut result, _) = handle(vec![Some(message)]);

        assert!(matches!(result.is_ready().await, Err(Error::MalformedResult(_))));
        assert_eq!(result.state(), TaskState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_waits_for_result() {
        let (mut result, fetches) = handle(vec![None, None, None, success(json!(4))]);

        let value = result
            .get(Duration::from_secs(10), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(value, json!(4));
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out() {
        let (mut result, _) = handle(vec![]);

        let err = result
            .get(Duration::from_secs(2), Duration::from_millis(500))
            .await
            .unwrap_err();
        match err {
            Error::Timeout { task_name, args, timeout } => {
                assert_eq!(task_name, "tasks.add");
                assert_eq!(args, "[2,2]");
                assert_eq!(timeout, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_without_deadline() {
        let (mut result, _) = handle(vec![success(json!(4))]);
        let value = result.get(Duration::MAX, Duration::from_millis(10)).await.unwrap();
        assert_eq!(value, json!(4));

        let (mut result, fetches) = handle(vec![None, None, success(json!(5))]);
        let value = result.get(Duration::MAX, Duration::from_millis(10)).await.unwrap();
        assert_eq!(value, json!(5));
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_serialized_handle_keeps_cache() {
        let (mut result, _) = handle(vec![success(json!("done"))]);
        assert!(result.is_ready().await.unwrap());

        let encoded = serde_json::to_string(&result).unwrap();
        let mut restored: AsyncResult = serde_json::from_str(&encoded).unwrap();

        assert_eq!(restored.id(), result.id());
        assert!(restored.connector.is_none());
        assert!(restored.is_ready().await.unwrap());
        assert!(restored.connector.is_none());
        assert_eq!(restored.result().unwrap(), &json!("done"));
    }

    #[test]
    fn test_forget_and_revoke_are_noops() {
        let (result, fetches) = handle(vec![]);
        result.forget();
        result.revoke();
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }
}
