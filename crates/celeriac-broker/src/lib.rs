//! Celeriac Broker - Connector abstraction over the supported transports
//!
//! This crate hides the broker backends behind one [`Connector`] trait:
//! - `native`: pooled AMQP connections (`amqp-native` feature)
//! - `amqp`: one AMQP connection per operation (`amqp` feature)
//! - `amqp-tls`: as `amqp`, over TLS (`amqp-tls` feature)
//! - `redis`: kombu-style Redis lists (`redis` feature)
//!
//! [`BackendRegistry`] picks a backend for a descriptor and builds the
//! matching connector.

#[cfg(any(feature = "amqp-native", feature = "amqp"))]
pub mod amqp;
#[cfg(feature = "redis")]
pub mod redis;
pub mod selector;
pub mod traits;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
#[cfg(feature = "amqp-native")]
pub use amqp::NativeConnector;
#[cfg(feature = "redis")]
pub use crate::redis::RedisConnector;
pub use selector::{select_backend, BackendRegistry, Capabilities};
pub use traits::{Connector, ConnectorError, ConnectorFactory, ConnectorResult};
