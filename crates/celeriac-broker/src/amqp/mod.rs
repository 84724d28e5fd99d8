//! AMQP backends using lapin
//!
//! Both AMQP connectors share the declaration and settlement logic here:
//! - The task queue (named by the binding) is durable and bound to a direct,
//!   durable exchange under the binding as routing key
//! - Publications use publisher confirms; a nack is reported as `false`
//! - Results land in a per-task queue (task id without dashes) bound to
//!   `celeryresults`, declared auto-delete with an optional `x-expires`
//! - Results are read with `basic_get` so a fetch never registers a consumer
//!   (which would trigger auto-deletion of the queue once it goes away)

#[cfg(feature = "amqp")]
mod direct;
#[cfg(feature = "amqp-native")]
mod native;

#[cfg(feature = "amqp")]
pub use direct::AmqpConnector;
#[cfg(feature = "amqp-native")]
pub use native::NativeConnector;

use crate::traits::{ConnectorError, ConnectorResult};
use celeriac_core::{ConnectionDescriptor, PublishProperties, ResultMessage};
use lapin::{
    message::BasicGetMessage,
    options::*,
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ExchangeKind,
};
use tracing::{debug, warn};

/// Exchange the workers publish results to
pub const RESULTS_EXCHANGE: &str = "celeryresults";

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Translate publish properties into AMQP basic properties
pub(crate) fn basic_properties(properties: &PublishProperties) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(properties.content_type.clone().into())
        .with_content_encoding(properties.content_encoding.clone().into());

    if let Some(mode) = properties.delivery_mode {
        props = props.with_delivery_mode(mode);
    }

    if !properties.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (key, value) in &properties.headers {
            headers.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
        }
        props = props.with_headers(headers);
    }

    props
}

/// Declare the task queue and exchange, then publish with confirms
pub(crate) async fn publish_envelope(
    channel: &Channel,
    descriptor: &ConnectionDescriptor,
    routing_key: &str,
    envelope: &[u8],
    properties: &PublishProperties,
) -> ConnectorResult<bool> {
    channel
        .queue_declare(
            &descriptor.binding,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?;

    channel
        .exchange_declare(
            &descriptor.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?;

    channel
        .queue_bind(
            &descriptor.binding,
            &descriptor.exchange,
            &descriptor.binding,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?;

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?;

    let confirmation = channel
        .basic_publish(
            &descriptor.exchange,
            routing_key,
            BasicPublishOptions::default(),
            envelope,
            basic_properties(properties),
        )
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?
        .await
        .map_err(|e| ConnectorError::Publish(e.to_string()))?;

    if let Confirmation::Nack(_) = confirmation {
        warn!(exchange = %descriptor.exchange, routing_key, "Broker rejected task envelope");
        return Ok(false);
    }

    debug!(exchange = %descriptor.exchange, routing_key, "Published task envelope");
    Ok(true)
}

/// Declare the result queue for a task and bind it to the results exchange
pub(crate) async fn declare_result_queue(
    channel: &Channel,
    descriptor: &ConnectionDescriptor,
    queue: &str,
) -> ConnectorResult<()> {
    let mut args = FieldTable::default();
    if let Some(ttl) = descriptor.result_ttl() {
        args.insert("x-expires".into(), AMQPValue::LongLongInt(ttl.as_millis() as i64));
    }

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: descriptor.durable_result_queue,
                auto_delete: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| ConnectorError::Consume(e.to_string()))?;

    channel
        .queue_bind(
            queue,
            RESULTS_EXCHANGE,
            queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| ConnectorError::Consume(e.to_string()))?;

    Ok(())
}

/// Try to take one message off the result queue
pub(crate) async fn get_one(channel: &Channel, queue: &str) -> ConnectorResult<Option<BasicGetMessage>> {
    channel
        .basic_get(queue, BasicGetOptions { no_ack: false })
        .await
        .map_err(|e| ConnectorError::Consume(e.to_string()))
}

/// Settle a fetched result and convert it
///
/// With `remove` the message is acked and the queue deleted; otherwise it is
/// requeued so the next reader sees it again.
pub(crate) async fn settle(
    channel: &Channel,
    queue: &str,
    message: BasicGetMessage,
    remove: bool,
) -> ConnectorResult<ResultMessage> {
    let delivery = &message.delivery;
    let result = ResultMessage::new(
        delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string()),
        delivery.data.clone(),
    );

    if remove {
        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| ConnectorError::Ack(e.to_string()))?;
        channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(|e| ConnectorError::Ack(e.to_string()))?;
    } else {
        channel
            .basic_nack(
                delivery.delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ConnectorError::Ack(e.to_string()))?;
    }

    result
        .validate()
        .map_err(|e| ConnectorError::Malformed(e.to_string()))?;
    Ok(result)
}

/// Close a channel, logging instead of failing
pub(crate) async fn close_channel(channel: &Channel) {
    if let Err(e) = channel.close(REPLY_SUCCESS, "OK").await {
        debug!("Channel close failed: {}", e);
    }
}

/// Close a connection, logging instead of failing
pub(crate) async fn close_connection(connection: &Connection) {
    if let Err(e) = connection.close(REPLY_SUCCESS, "OK").await {
        debug!("Connection close failed: {}", e);
    }
}
