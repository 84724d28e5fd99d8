//! Backend selection and the connector registry

use crate::traits::{Connector, ConnectorFactory};
use celeriac_core::{BackendKind, ConnectionDescriptor, Error, Result};
use tracing::{debug, warn};

/// Plain-transport precedence, fastest first
const PLAIN_PRECEDENCE: [BackendKind; 3] = [BackendKind::Native, BackendKind::Amqp, BackendKind::Redis];

/// Which backends are usable in this process
///
/// Detection only looks at what was compiled in; it never opens a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    native: bool,
    amqp: bool,
    amqp_tls: bool,
    redis: bool,
}

impl Capabilities {
    /// The backends compiled into this build
    pub fn detect() -> Self {
        Self {
            native: cfg!(feature = "amqp-native"),
            amqp: cfg!(feature = "amqp"),
            amqp_tls: cfg!(feature = "amqp-tls"),
            redis: cfg!(feature = "redis"),
        }
    }

    /// No backend at all
    pub fn none() -> Self {
        Self::default()
    }

    /// Every backend
    pub fn all() -> Self {
        Self::only(&BackendKind::ALL)
    }

    /// Exactly the listed backends
    pub fn only(kinds: &[BackendKind]) -> Self {
        kinds.iter().fold(Self::none(), |caps, kind| caps.with(*kind))
    }

    /// Add a backend
    pub fn with(mut self, kind: BackendKind) -> Self {
        *self.flag_mut(kind) = true;
        self
    }

    /// Remove a backend
    pub fn without(mut self, kind: BackendKind) -> Self {
        *self.flag_mut(kind) = false;
        self
    }

    /// Check if a backend is usable
    pub fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Native => self.native,
            BackendKind::Amqp => self.amqp,
            BackendKind::AmqpTls => self.amqp_tls,
            BackendKind::Redis => self.redis,
        }
    }

    /// Usable backends in declaration order
    pub fn available(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }

    fn flag_mut(&mut self, kind: BackendKind) -> &mut bool {
        match kind {
            BackendKind::Native => &mut self.native,
            BackendKind::Amqp => &mut self.amqp,
            BackendKind::AmqpTls => &mut self.amqp_tls,
            BackendKind::Redis => &mut self.redis,
        }
    }
}

/// Pick the backend for a connection
///
/// An explicit name must be known and usable. Without one, TLS restricts the
/// choice to `amqp-tls`; otherwise the first usable of native, amqp, redis wins.
pub fn select_backend(
    explicit: Option<&str>,
    wants_tls: bool,
    capabilities: &Capabilities,
) -> Result<BackendKind> {
    if let Some(name) = explicit {
        let kind: BackendKind = name.parse()?;
        if !capabilities.supports(kind) {
            return Err(Error::BackendUnavailable(kind.as_str().to_string()));
        }
        if wants_tls && !kind.supports_tls() {
            warn!(backend = %kind, "TLS options are ignored by the requested backend");
        }
        return Ok(kind);
    }

    if wants_tls {
        return if capabilities.supports(BackendKind::AmqpTls) {
            Ok(BackendKind::AmqpTls)
        } else {
            Err(Error::NoBackendAvailable)
        };
    }

    PLAIN_PRECEDENCE
        .into_iter()
        .find(|kind| capabilities.supports(*kind))
        .ok_or(Error::NoBackendAvailable)
}

/// Maps resolved backends to their adapters
#[derive(Debug, Clone, Copy)]
pub struct BackendRegistry {
    capabilities: Capabilities,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Registry over the compiled-in backends
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::detect())
    }

    /// Registry over an explicit capability set
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// The capabilities used for selection
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Resolve the backend a descriptor asks for
    pub fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<BackendKind> {
        let kind = select_backend(
            descriptor.explicit_backend(),
            descriptor.wants_tls(),
            &self.capabilities,
        )?;
        debug!(backend = %kind, endpoint = %descriptor.endpoint(), "Selected backend");
        Ok(kind)
    }

    /// Resolve the backend and build an unconnected connector for it
    pub fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn Connector>> {
        let kind = self.resolve(descriptor)?;
        build_connector(kind, descriptor)
    }
}

impl ConnectorFactory for BackendRegistry {
    fn create(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn Connector>> {
        self.open(descriptor)
    }
}

fn build_connector(kind: BackendKind, descriptor: &ConnectionDescriptor) -> Result<Box<dyn Connector>> {
    match kind {
        #[cfg(feature = "amqp-native")]
        BackendKind::Native => Ok(Box::new(crate::amqp::NativeConnector::new(descriptor.clone()))),
        #[cfg(feature = "amqp")]
        BackendKind::Amqp => Ok(Box::new(crate::amqp::AmqpConnector::new(descriptor.clone()))),
        #[cfg(feature = "amqp-tls")]
        BackendKind::AmqpTls => Ok(Box::new(crate::amqp::AmqpConnector::with_tls(descriptor.clone())?)),
        #[cfg(feature = "redis")]
        BackendKind::Redis => Ok(Box::new(crate::redis::RedisConnector::new(descriptor.clone()))),
        #[allow(unreachable_patterns)]
        other => {
            let _ = descriptor;
            Err(Error::BackendUnavailable(other.as_str().to_string()))
        }
    }
}
