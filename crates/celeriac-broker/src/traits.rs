//! Connector trait definitions

use async_trait::async_trait;
use celeriac_core::{BackendKind, ConnectionDescriptor, PublishProperties, ResultMessage, TaskId};
use thiserror::Error;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors that can occur inside a backend adapter
///
/// Every transport library error is flattened into one of these before it
/// leaves the adapter.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Connect, authentication or handshake failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Publish rejected by the broker
    #[error("publish error: {0}")]
    Publish(String),

    /// Queue declaration or consume failure while fetching a result
    #[error("consume error: {0}")]
    Consume(String),

    /// Acknowledgment error
    #[error("acknowledgment error: {0}")]
    Ack(String),

    /// A result exists but is not in the expected format
    #[error("malformed result: {0}")]
    Malformed(String),

    /// Connection pool error
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Operation attempted on a connector that was never connected
    #[error("connector is not connected")]
    NotConnected,
}

impl From<ConnectorError> for celeriac_core::Error {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Publish(msg) => celeriac_core::Error::PublishFailed(msg),
            ConnectorError::Malformed(msg) => celeriac_core::Error::MalformedResult(msg),
            other => celeriac_core::Error::ConnectionFailed(other.to_string()),
        }
    }
}

/// One backend's view of a broker
///
/// A connector owns exactly one transport handle. Methods that touch the
/// transport take `&mut self`; callers needing concurrent submissions create
/// separate connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Which backend this connector implements
    fn kind(&self) -> BackendKind;

    /// The descriptor the connector was opened from
    fn descriptor(&self) -> &ConnectionDescriptor;

    /// Check if `connect` has completed
    fn is_connected(&self) -> bool;

    /// Establish the transport. Calling it again on a connected handle is a no-op.
    async fn connect(&mut self) -> ConnectorResult<()>;

    /// Declare the task queue and exchange, then publish one envelope
    ///
    /// Returns `false` when the broker refused the message.
    async fn publish(
        &mut self,
        routing_key: &str,
        envelope: &[u8],
        properties: &PublishProperties,
    ) -> ConnectorResult<bool>;

    /// Make one bounded attempt to read the result for `task_id`
    ///
    /// `Ok(None)` means the result is not ready. With `remove` the message is
    /// consumed so later fetches see `None`; without it the message stays
    /// readable.
    async fn fetch_result(
        &mut self,
        task_id: &TaskId,
        remove: bool,
    ) -> ConnectorResult<Option<ResultMessage>>;

    /// Release the transport
    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Something that can open connectors for descriptors
///
/// Used by lazily reconnecting handles such as a deserialized `AsyncResult`.
pub trait ConnectorFactory: Send + Sync {
    /// Resolve the backend for `descriptor` and build an unconnected connector
    fn create(&self, descriptor: &ConnectionDescriptor) -> celeriac_core::Result<Box<dyn Connector>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: celeriac_core::Error = ConnectorError::Publish("nack".into()).into();
        assert!(matches!(err, celeriac_core::Error::PublishFailed(_)));

        let err: celeriac_core::Error = ConnectorError::Malformed("text/plain".into()).into();
        assert!(matches!(err, celeriac_core::Error::MalformedResult(_)));

        let err: celeriac_core::Error = ConnectorError::Pool("exhausted".into()).into();
        assert!(matches!(err, celeriac_core::Error::ConnectionFailed(_)));

        let err: celeriac_core::Error = ConnectorError::NotConnected.into();
        assert!(err.is_retryable());
    }
}
