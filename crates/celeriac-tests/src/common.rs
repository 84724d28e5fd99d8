//! Common test utilities and fixtures

use async_trait::async_trait;
use celeriac_broker::{Connector, ConnectorFactory, ConnectorResult};
use celeriac_core::{
    BackendKind, ConnectionDescriptor, PublishProperties, ResultMessage, TaskEnvelope, TaskId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize test environment (logging, etc.)
pub fn init() {
    INIT.call_once(|| {
        // Set up test logging
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("celeriac=debug")
            .try_init();
    });
}

/// Check if something is listening on `addr`, for tests that need a live broker
pub async fn service_available(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_secs(1), tokio::net::TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Descriptor pointing nowhere; fakes never dial it
pub fn fake_descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new("broker.invalid", "guest", "guest", "/")
}

/// A publication recorded by the fake backend
#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: PublishProperties,
}

impl Published {
    /// Decode the published envelope
    pub fn envelope(&self) -> TaskEnvelope {
        TaskEnvelope::from_bytes(&self.body).expect("published body is an envelope")
    }
}

struct StoredResult {
    message: ResultMessage,
    /// Fetches that still report "not ready"
    hidden_for: usize,
}

#[derive(Default)]
struct State {
    published: Vec<Published>,
    results: HashMap<String, StoredResult>,
    reject_publishes: bool,
    connects: usize,
    fetches: usize,
    opened_for: Vec<String>,
}

/// In-memory broker shared by any number of fake connectors
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake backend lock poisoned")
    }

    /// Store a result message for a task
    pub fn put_result(&self, task_id: &TaskId, message: ResultMessage) {
        self.put_result_after(task_id, 0, message);
    }

    /// Store a result that only shows up after `not_ready` fetches
    pub fn put_result_after(&self, task_id: &TaskId, not_ready: usize, message: ResultMessage) {
        self.state().results.insert(
            task_id.to_string(),
            StoredResult {
                message,
                hidden_for: not_ready,
            },
        );
    }

    /// Store a successful result
    pub fn put_success(&self, task_id: &TaskId, result: Value) {
        self.put_result(task_id, success_message(result));
    }

    /// Store a failed result
    pub fn put_failure(&self, task_id: &TaskId, traceback: &str) {
        self.put_result(task_id, failure_message(traceback));
    }

    /// Make the broker nack every publication
    pub fn reject_publishes(&self) {
        self.state().reject_publishes = true;
    }

    /// Check if a result is still stored
    pub fn has_result(&self, task_id: &TaskId) -> bool {
        self.state().results.contains_key(task_id.as_str())
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    /// Number of `fetch_result` calls across all connectors
    pub fn fetches(&self) -> usize {
        self.state().fetches
    }

    /// Number of `connect` calls that actually connected
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Hosts of the descriptors connectors were opened for, in order
    pub fn opened_for(&self) -> Vec<String> {
        self.state().opened_for.clone()
    }

    /// A connector over this backend
    pub fn connector(&self, descriptor: ConnectionDescriptor) -> FakeConnector {
        self.state().opened_for.push(descriptor.host.clone());
        FakeConnector {
            backend: self.clone(),
            descriptor,
            connected: false,
        }
    }

    /// A factory handing out connectors over this backend
    pub fn factory(&self) -> Arc<dyn ConnectorFactory> {
        Arc::new(FakeFactory {
            backend: self.clone(),
        })
    }
}

/// Connector over a [`FakeBackend`]
pub struct FakeConnector {
    backend: FakeBackend,
    descriptor: ConnectionDescriptor,
    connected: bool,
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Amqp
    }

    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> ConnectorResult<()> {
        if !self.connected {
            self.backend.state().connects += 1;
            self.connected = true;
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        routing_key: &str,
        envelope: &[u8],
        properties: &PublishProperties,
    ) -> ConnectorResult<bool> {
        let mut state = self.backend.state();
        if state.reject_publishes {
            return Ok(false);
        }
        state.published.push(Published {
            exchange: self.descriptor.exchange.clone(),
            routing_key: routing_key.to_string(),
            body: envelope.to_vec(),
            properties: properties.clone(),
        });
        Ok(true)
    }

    async fn fetch_result(
        &mut self,
        task_id: &TaskId,
        remove: bool,
    ) -> ConnectorResult<Option<ResultMessage>> {
        let mut state = self.backend.state();
        state.fetches += 1;

        let Some(stored) = state.results.get_mut(task_id.as_str()) else {
            return Ok(None);
        };
        if stored.hidden_for > 0 {
            stored.hidden_for -= 1;
            return Ok(None);
        }

        if remove {
            Ok(state.results.remove(task_id.as_str()).map(|stored| stored.message))
        } else {
            Ok(Some(stored.message.clone()))
        }
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.connected = false;
        Ok(())
    }
}

struct FakeFactory {
    backend: FakeBackend,
}

impl ConnectorFactory for FakeFactory {
    fn create(&self, descriptor: &ConnectionDescriptor) -> celeriac_core::Result<Box<dyn Connector>> {
        Ok(Box::new(self.backend.connector(descriptor.clone())))
    }
}

/// A JSON result message reporting success
pub fn success_message(result: Value) -> ResultMessage {
    ResultMessage::json(json!({"status": "SUCCESS", "result": result}).to_string())
}

/// A JSON result message reporting failure
pub fn failure_message(traceback: &str) -> ResultMessage {
    ResultMessage::json(
        json!({
            "status": "FAILURE",
            "result": {"exc_type": "ZeroDivisionError", "exc_message": "division by zero"},
            "traceback": traceback,
        })
        .to_string(),
    )
}
