//! Redis connector using the kombu list layout
//!
//! Tasks are wrapped in a kombu message (body base64-encoded) and pushed onto
//! the list named by the exchange. Workers store results as JSON strings under
//! `celery-task-meta-<task id>`.

use crate::traits::{Connector, ConnectorError, ConnectorResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use celeriac_core::{BackendKind, ConnectionDescriptor, PublishProperties, ResultMessage, TaskId};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

type Connection = deadpool_redis::Connection;

/// Key prefix of stored task results
const RESULT_KEY_PREFIX: &str = "celery-task-meta-";

/// Default pool size
const DEFAULT_POOL_SIZE: usize = 4;

/// Delivery mode used when the properties do not ask for one
const DEFAULT_DELIVERY_MODE: u8 = 2;

/// Kombu transport message
#[derive(Debug, Serialize)]
struct KombuMessage<'a> {
    body: String,
    headers: &'a BTreeMap<String, String>,
    #[serde(rename = "content-type")]
    content_type: &'a str,
    #[serde(rename = "content-encoding")]
    content_encoding: String,
    properties: KombuProperties<'a>,
}

#[derive(Debug, Serialize)]
struct KombuProperties<'a> {
    body_encoding: &'static str,
    reply_to: &'a str,
    delivery_info: DeliveryInfo<'a>,
    delivery_mode: u8,
    delivery_tag: &'a str,
}

#[derive(Debug, Serialize)]
struct DeliveryInfo<'a> {
    priority: u8,
    routing_key: &'a str,
    exchange: &'a str,
}

/// Build the kombu message pushed for one envelope
fn kombu_message(
    descriptor: &ConnectionDescriptor,
    routing_key: &str,
    envelope: &[u8],
    properties: &PublishProperties,
) -> ConnectorResult<String> {
    let parsed: serde_json::Value =
        serde_json::from_slice(envelope).map_err(|e| ConnectorError::Publish(e.to_string()))?;
    let task_id = parsed
        .get("id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| ConnectorError::Publish("envelope has no task id".to_string()))?;

    let message = KombuMessage {
        body: STANDARD.encode(envelope),
        headers: &properties.headers,
        content_type: &properties.content_type,
        content_encoding: properties.content_encoding.to_lowercase(),
        properties: KombuProperties {
            body_encoding: "base64",
            reply_to: task_id,
            delivery_info: DeliveryInfo {
                priority: 0,
                routing_key,
                exchange: &descriptor.exchange,
            },
            delivery_mode: properties.delivery_mode.unwrap_or(DEFAULT_DELIVERY_MODE),
            delivery_tag: task_id,
        },
    };

    serde_json::to_string(&message).map_err(|e| ConnectorError::Publish(e.to_string()))
}

/// Redis connector backed by a connection pool
pub struct RedisConnector {
    descriptor: ConnectionDescriptor,
    pool_size: usize,
    pool: Option<Pool>,
}

impl RedisConnector {
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

    /// Get the result key for a task
    pub fn result_key(task_id: &TaskId) -> String {
        format!("{}{}", RESULT_KEY_PREFIX, task_id)
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> ConnectorResult<Connection> {
        let pool = self.pool.as_ref().ok_or(ConnectorError::NotConnected)?;
        pool.get()
            .await
            .map_err(|e| ConnectorError::Pool(e.to_string()))
    }
}

#[async_trait]
impl Connector for RedisConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
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

        let cfg = Config::from_url(self.descriptor.redis_url());
        let pool = cfg
            .builder()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?
            .max_size(self.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        info!("Connected to Redis at {}", self.descriptor.endpoint());
        self.pool = Some(pool);
        Ok(())
    }

    async fn publish(
        &mut self,
        routing_key: &str,
        envelope: &[u8],
        properties: &PublishProperties,
    ) -> ConnectorResult<bool> {
        let message = kombu_message(&self.descriptor, routing_key, envelope, properties)?;
        let mut conn = self.get_conn().await?;

        let _: i64 = conn
            .lpush(&self.descriptor.exchange, message)
            .await
            .map_err(|e| ConnectorError::Publish(e.to_string()))?;

        debug!(list = %self.descriptor.exchange, routing_key, "Pushed task envelope");
        Ok(true)
    }

    async fn fetch_result(
        &mut self,
        task_id: &TaskId,
        remove: bool,
    ) -> ConnectorResult<Option<ResultMessage>> {
        let key = Self::result_key(task_id);
        let mut conn = self.get_conn().await?;

        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| ConnectorError::Consume(e.to_string()))?;

        let Some(raw) = raw else {
            debug!(task_id = %task_id, "Result not ready");
            return Ok(None);
        };

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) if value.is_object() => {}
            _ => {
                return Err(ConnectorError::Malformed(format!(
                    "value under {} is not a JSON object",
                    key
                )))
            }
        }

        if remove {
            let _: i64 = conn
                .del(&key)
                .await
                .map_err(|e| ConnectorError::Ack(e.to_string()))?;
        }

        Ok(Some(ResultMessage::json(raw)))
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
    use serde_json::{json, Value};

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("localhost", "", "", "0").port(6379).backend("redis")
    }

    #[test]
    fn test_result_key() {
        let id = TaskId::from_string("d7e3a5f6-1111-2222-3333-444455556666");
        assert_eq!(
            RedisConnector::result_key(&id),
            "celery-task-meta-d7e3a5f6-1111-2222-3333-444455556666"
        );
    }

    #[test]
    fn test_kombu_message_layout() {
        let envelope = br#"{"id":"abc","task":"tasks.add","args":[2,2],"kwargs":{}}"#;
        let raw = kombu_message(&descriptor(), "celery", envelope, &PublishProperties::json()).unwrap();
        let message: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(message["content-type"], "application/json");
        assert_eq!(message["content-encoding"], "utf-8");
        assert_eq!(message["headers"], json!({}));
        assert_eq!(message["properties"]["body_encoding"], "base64");
        assert_eq!(message["properties"]["reply_to"], "abc");
        assert_eq!(message["properties"]["delivery_tag"], "abc");
        assert_eq!(message["properties"]["delivery_mode"], 2);
        assert_eq!(
            message["properties"]["delivery_info"],
            json!({"priority": 0, "routing_key": "celery", "exchange": "celery"})
        );

        let body = STANDARD.decode(message["body"].as_str().unwrap()).unwrap();
        assert_eq!(body, envelope.to_vec());
    }

    #[test]
    fn test_kombu_message_requires_task_id() {
        let err = kombu_message(&descriptor(), "celery", br#"{"task":"tasks.add"}"#, &PublishProperties::json())
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Publish(_)));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_fetch_and_remove() {
        let mut connector = RedisConnector::new(descriptor());
        connector.connect().await.unwrap();

        let id = TaskId::new();
        let mut conn = connector.get_conn().await.unwrap();
        let _: () = conn
            .set(RedisConnector::result_key(&id), r#"{"status":"SUCCESS","result":4}"#)
            .await
            .unwrap();

        let kept = connector.fetch_result(&id, false).await.unwrap();
        assert!(kept.is_some());
        let taken = connector.fetch_result(&id, true).await.unwrap();
        assert_eq!(taken, kept);
        assert!(connector.fetch_result(&id, true).await.unwrap().is_none());
    }
}
