//! Direct AMQP connector, plain or over TLS
//!
//! Every publish and fetch opens its own connection and closes it before
//! returning, on success and on error. A fetch polls `basic_get` for at most
//! the descriptor's wait timeout.

use super::{close_channel, close_connection, declare_result_queue, get_one, publish_envelope, settle};
use crate::traits::{Connector, ConnectorError, ConnectorResult};
use async_trait::async_trait;
use celeriac_core::{BackendKind, ConnectionDescriptor, PublishProperties, ResultMessage, TaskId};
use lapin::{Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Spacing between `basic_get` attempts within one fetch
const GET_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// AMQP connector opening one connection per operation
pub struct AmqpConnector {
    descriptor: ConnectionDescriptor,
    kind: BackendKind,
    uri: String,
    /// PEM CA chain for TLS connections
    #[cfg_attr(not(feature = "amqp-tls"), allow(dead_code))]
    cert_chain: Option<String>,
    connected: bool,
}

impl AmqpConnector {
    /// Create an unconnected plain AMQP connector
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        let uri = descriptor.amqp_uri();
        Self {
            descriptor,
            kind: BackendKind::Amqp,
            uri,
            cert_chain: None,
            connected: false,
        }
    }

    /// Create an unconnected TLS connector
    ///
    /// The TLS options are validated and the CA chain read here, so
    /// configuration mistakes surface before any network traffic.
    #[cfg(feature = "amqp-tls")]
    pub fn with_tls(descriptor: ConnectionDescriptor) -> celeriac_core::Result<Self> {
        let tls = &descriptor.ssl_options;
        tls.validate()?;

        if tls.is_mtls() {
            return Err(celeriac_core::Error::Configuration(
                "client certificates are not supported by the amqp-tls backend".to_string(),
            ));
        }
        if tls.skip_verify || tls.server_name.is_some() {
            tracing::warn!("skip_verify and server_name are not applied by the amqp-tls backend");
        }

        let cert_chain = tls.read_ca_chain()?;
        let uri = tls.apply_to_url(&descriptor.amqp_uri());

        Ok(Self {
            descriptor,
            kind: BackendKind::AmqpTls,
            uri,
            cert_chain,
            connected: false,
        })
    }

    async fn open(&self) -> ConnectorResult<Connection> {
        let properties = ConnectionProperties::default();

        #[cfg(feature = "amqp-tls")]
        if self.kind == BackendKind::AmqpTls {
            let config = lapin::tcp::OwnedTLSConfig {
                identity: None,
                cert_chain: self.cert_chain.clone(),
            };
            return Connection::connect_with_config(&self.uri, properties, config)
                .await
                .map_err(|e| ConnectorError::Connection(e.to_string()));
        }

        Connection::connect(&self.uri, properties)
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))
    }

    /// Open a connection and a channel on it
    async fn session(&self) -> ConnectorResult<(Connection, Channel)> {
        if !self.connected {
            return Err(ConnectorError::NotConnected);
        }

        let connection = self.open().await?;
        match connection.create_channel().await {
            Ok(channel) => Ok((connection, channel)),
            Err(e) => {
                close_connection(&connection).await;
                Err(ConnectorError::Connection(e.to_string()))
            }
        }
    }

    async fn release(connection: Connection, channel: Channel) {
        close_channel(&channel).await;
        close_connection(&connection).await;
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> ConnectorResult<()> {
        if self.connected {
            return Ok(());
        }

        // Handshake once so bad credentials fail here
        let connection = self.open().await?;
        close_connection(&connection).await;

        info!(backend = %self.kind, "Connected to AMQP broker at {}", self.descriptor.endpoint());
        self.connected = true;
        Ok(())
    }

    async fn publish(
        &mut self,
        routing_key: &str,
        envelope: &[u8],
        properties: &PublishProperties,
    ) -> ConnectorResult<bool> {
        let (connection, channel) = self.session().await?;
        let outcome = publish_envelope(&channel, &self.descriptor, routing_key, envelope, properties).await;
        Self::release(connection, channel).await;
        outcome
    }

    async fn fetch_result(
        &mut self,
        task_id: &TaskId,
        remove: bool,
    ) -> ConnectorResult<Option<ResultMessage>> {
        let (connection, channel) = self.session().await?;
        let queue = task_id.result_queue();
        let deadline = Instant::now().checked_add(self.descriptor.wait_timeout_duration());

        let outcome = async {
            declare_result_queue(&channel, &self.descriptor, &queue).await?;
            loop {
                if let Some(message) = get_one(&channel, &queue).await? {
                    return settle(&channel, &queue, message, remove).await.map(Some);
                }
                if deadline.is_some_and(|deadline| Instant::now() + GET_RETRY_INTERVAL > deadline) {
                    debug!(task_id = %task_id, "Result not ready");
                    return Ok(None);
                }
                tokio::time::sleep(GET_RETRY_INTERVAL).await;
            }
        }
        .await;

        Self::release(connection, channel).await;
        outcome
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_uri() {
        let connector = AmqpConnector::new(ConnectionDescriptor::new("rabbit", "guest", "guest", "/"));
        assert_eq!(connector.kind(), BackendKind::Amqp);
        assert!(connector.uri.starts_with("amqp://"));
        assert!(connector.uri.ends_with("/%2F"));
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let mut connector = AmqpConnector::new(ConnectionDescriptor::new("rabbit", "guest", "guest", "/"));
        let err = connector
            .publish("celery", b"{}", &PublishProperties::json())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));
    }

    #[cfg(feature = "amqp-tls")]
    #[test]
    fn test_tls_connector_reads_ca_chain() {
        use celeriac_core::TlsOptions;
        use std::io::Write;

        let mut ca = tempfile::NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();
        writeln!(ca, "-----END CERTIFICATE-----").unwrap();

        let descriptor = ConnectionDescriptor::new("rabbit", "guest", "guest", "/")
            .port(5671)
            .ssl_options(TlsOptions::with_ca(ca.path()));
        let connector = AmqpConnector::with_tls(descriptor).unwrap();

        assert_eq!(connector.kind(), BackendKind::AmqpTls);
        assert!(connector.uri.starts_with("amqps://"));
        assert!(connector.cert_chain.as_deref().unwrap().contains("BEGIN CERTIFICATE"));
    }

    #[cfg(feature = "amqp-tls")]
    #[test]
    fn test_tls_connector_rejects_missing_ca() {
        use celeriac_core::TlsOptions;

        let descriptor = ConnectionDescriptor::new("rabbit", "guest", "guest", "/")
            .ssl_options(TlsOptions::with_ca("/nonexistent/ca.pem"));
        assert!(matches!(
            AmqpConnector::with_tls(descriptor),
            Err(celeriac_core::Error::Configuration(_))
        ));
    }
}
