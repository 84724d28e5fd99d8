//! Task producer: builds envelopes and hands them to a connector

use crate::observe;
use celeriac_broker::Connector;
use celeriac_core::{Error, PublishProperties, Result, TaskEnvelope, TaskOptions};
use celeriac_telemetry::{log_task_submitted, TaskLogContext};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{warn, Instrument};

/// Publishes task envelopes through one connector
pub struct TaskProducer<'a> {
    connector: &'a mut dyn Connector,
}

impl<'a> TaskProducer<'a> {
    /// Create a producer over a connector
    pub fn new(connector: &'a mut dyn Connector) -> Self {
        Self { connector }
    }

    /// Build an envelope for `task_name` and publish it
    ///
    /// Argument and option validation happens before the connector is touched.
    pub async fn submit(
        &mut self,
        task_name: &str,
        args: Value,
        options: &TaskOptions,
    ) -> Result<TaskEnvelope> {
        let envelope = TaskEnvelope::build(task_name, args, options)?;
        self.publish(&envelope, options.routing_key.as_deref()).await?;
        Ok(envelope)
    }

    /// Publish a prepared envelope
    ///
    /// The routing key defaults to the descriptor's binding.
    pub async fn publish(&mut self, envelope: &TaskEnvelope, routing_key: Option<&str>) -> Result<()> {
        let body = envelope.to_bytes()?;
        let descriptor = self.connector.descriptor();
        let routing_key = routing_key.unwrap_or(&descriptor.binding).to_string();
        let exchange = descriptor.exchange.clone();
        let properties = PublishProperties::json().persistent(descriptor.persistent_messages);
        let backend = self.connector.kind();

        self.connector.connect().await?;

        let span = TaskLogContext::new(envelope.id.as_str(), &envelope.task, &exchange).span();
        let started = Instant::now();
        let accepted = match self
            .connector
            .publish(&routing_key, &body, &properties)
            .instrument(span)
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                observe::publish_failed(backend.as_str());
                return Err(e.into());
            }
        };

        if !accepted {
            observe::publish_failed(backend.as_str());
            warn!(task_id = %envelope.id, task_name = %envelope.task, "Broker did not accept task");
            return Err(Error::PublishFailed(format!(
                "broker did not accept task {}[{}]",
                envelope.task, envelope.id
            )));
        }

        observe::task_submitted(&exchange, &envelope.task, started.elapsed());
        log_task_submitted!(envelope.id, envelope.task, exchange);
        Ok(())
    }
}
