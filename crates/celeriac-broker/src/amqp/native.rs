//! Pooled AMQP connector
//!
//! Connections come from a `deadpool-lapin` pool built on `connect`. Each
//! operation opens its own channel and closes it before returning; the pooled
//! connection goes back to the pool. Result fetches are a single `basic_get`.

use super::{close_channel, declare_result_queue, get_one, publish_envelope, settle};
use crate::traits::{Connector, ConnectorError, ConnectorResult};
use async_trait::async_trait;
use celeriac_core::{BackendKind, ConnectionDescriptor, PublishProperties, ResultMessage, TaskId};
use deadpool_lapin::{Config, Pool, Runtime};
use lapin::Channel;
use tracing::{debug, info};

/// Default pool size
const DEFAULT_POOL_SIZE: usize = 4;

/// AMQP connector backed by a connection pool
pub struct NativeConnector {
    descriptor: ConnectionDescriptor,
    pool_size: usize,
    pool: Option<Pool>,
}

impl NativeConnector {
    /// Create an unconnected connector
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            pool_size: DEFAULT_POOL_SIZE,
            pool: None,
        }
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Get a channel from the pool
    async fn get_channel(&self) -> ConnectorResult<Channel> {
        let pool = self.pool.as_ref().ok_or(ConnectorError::NotConnected)?;
        let conn = pool
            .get()
            .await
            .map_err(|e| ConnectorError::Pool(e.to_string()))?;

        conn.create_channel()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Connector for NativeConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn connect(&mut self) -> ConnectorResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let cfg = Config {
            url: Some(self.descriptor.amqp_uri()),
            ..Default::default()
        };

        let pool = cfg
            .builder(Some(Runtime::Tokio1))
            .max_size(self.pool_size)
            .build()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        // Test connection
        pool.get()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        info!("Connected to AMQP broker at {}", self.descriptor.endpoint());
        self.pool = Some(pool);
        Ok(())
    }

    async fn publish(
        &mut self,
        routing_key: &str,
        envelope: &[u8],
        properties: &PublishProperties,
    ) -> ConnectorResult<bool> {
        let channel = self.get_channel().await?;
        let outcome = publish_envelope(&channel, &self.descriptor, routing_key, envelope, properties).await;
        close_channel(&channel).await;
        outcome
    }

    async fn fetch_result(
        &mut self,
        task_id: &TaskId,
        remove: bool,
    ) -> ConnectorResult<Option<ResultMessage>> {
        let channel = self.get_channel().await?;
        let queue = task_id.result_queue();

        let outcome = async {
            declare_result_queue(&channel, &self.descriptor, &queue).await?;
            match get_one(&channel, &queue).await? {
                Some(message) => settle(&channel, &queue, message, remove).await.map(Some),
                None => {
                    debug!(task_id = %task_id, "Result not ready");
                    Ok(None)
                }
            }
        }
        .await;

        close_channel(&channel).await;
        outcome
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_connect() {
        let mut connector = NativeConnector::new(ConnectionDescriptor::new("localhost", "guest", "guest", "/"));
        assert!(!connector.is_connected());

        let err = connector
            .publish("celery", b"{}", &PublishProperties::json())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));

        let err = connector.fetch_result(&TaskId::new(), true).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ"]
    async fn test_connect_is_idempotent() {
        let mut connector = NativeConnector::new(ConnectionDescriptor::new("localhost", "guest", "guest", "/"));
        connector.connect().await.unwrap();
        connector.connect().await.unwrap();
        assert!(connector.is_connected());
        connector.close().await.unwrap();
        assert!(!connector.is_connected());
    }
}
