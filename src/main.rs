// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Consume order events in batches and forward them to the audit-log service.
use envconfig::Envconfig;

use rabbitmq_batch::{
    config::EnvSecsDuration,
    orders::{
        HttpAuditLogClient, OmsOrderCreatedMessage, OmsOrderStatusChangedMessage,
        OrderCreatedHandler, OrderStatusChangedHandler,
    },
    AmqpError, BatchConfig, BatchConsumer, DeadLetterSettings, RabbitMqConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Envconfig)]
struct Config {
    #[envconfig(nested = true)]
    rabbitmq: RabbitMqConfig,

    #[envconfig(from = "OMS_BASE_ADDRESS", default = "http://localhost:5000")]
    oms_base_address: String,

    #[envconfig(nested = true)]
    order_created: OrderCreatedTopic,

    #[envconfig(nested = true)]
    order_status_changed: OrderStatusChangedTopic,
}

#[derive(Envconfig)]
struct OrderCreatedTopic {
    #[envconfig(from = "ORDER_CREATED_QUEUE", default = "oms.order.created")]
    queue: String,

    #[envconfig(from = "ORDER_CREATED_BATCH_SIZE", default = "100")]
    batch_size: usize,

    #[envconfig(from = "ORDER_CREATED_BATCH_TIMEOUT_SECONDS", default = "5")]
    batch_timeout: EnvSecsDuration,

    #[envconfig(from = "ORDER_CREATED_DLX", default = "oms.order.created.dlx")]
    dlx: String,

    #[envconfig(from = "ORDER_CREATED_DLQ", default = "oms.order.created.dlq")]
    dlq: String,

    #[envconfig(from = "ORDER_CREATED_ROUTING_KEY", default = "oms.order.created")]
    routing_key: String,
}

#[derive(Envconfig)]
struct OrderStatusChangedTopic {
    #[envconfig(from = "ORDER_STATUS_CHANGED_QUEUE", default = "oms.order.status-changed")]
    queue: String,

    #[envconfig(from = "ORDER_STATUS_CHANGED_BATCH_SIZE", default = "100")]
    batch_size: usize,

    #[envconfig(from = "ORDER_STATUS_CHANGED_BATCH_TIMEOUT_SECONDS", default = "5")]
    batch_timeout: EnvSecsDuration,

    #[envconfig(from = "ORDER_STATUS_CHANGED_DLX", default = "oms.order.status-changed.dlx")]
    dlx: String,

    #[envconfig(from = "ORDER_STATUS_CHANGED_DLQ", default = "oms.order.status-changed.dlq")]
    dlq: String,

    #[envconfig(
        from = "ORDER_STATUS_CHANGED_ROUTING_KEY",
        default = "oms.order.status-changed"
    )]
    routing_key: String,
}

impl OrderCreatedTopic {
    fn batch_config(&self) -> Result<BatchConfig, AmqpError> {
        batch_config(
            &self.queue,
            self.batch_size,
            &self.batch_timeout,
            &self.dlx,
            &self.dlq,
            &self.routing_key,
        )
    }
}

impl OrderStatusChangedTopic {
    fn batch_config(&self) -> Result<BatchConfig, AmqpError> {
        batch_config(
            &self.queue,
            self.batch_size,
            &self.batch_timeout,
            &self.dlx,
            &self.dlq,
            &self.routing_key,
        )
    }
}

fn batch_config(
    queue: &str,
    batch_size: usize,
    batch_timeout: &EnvSecsDuration,
    dlx: &str,
    dlq: &str,
    routing_key: &str,
) -> Result<BatchConfig, AmqpError> {
    BatchConfig::new(
        queue,
        batch_size,
        batch_timeout.0,
        DeadLetterSettings::new(dlx, dlq, routing_key),
    )
}

/// Process result of a startup in which at least one consumer failed.
///
/// A startup cancelled by the shutdown signal is a clean exit; any other
/// failure is returned.
fn startup_failure(
    results: impl IntoIterator<Item = Result<(), AmqpError>>,
) -> Result<(), AmqpError> {
    for result in results {
        match result {
            Ok(()) | Err(AmqpError::Cancelled) => {}
            Err(err) => return Err(err),
        }
    }

    info!("startup interrupted by shutdown signal");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AmqpError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let audit_client = Arc::new(HttpAuditLogClient::new(&config.oms_base_address));

    let mut order_created = BatchConsumer::<OmsOrderCreatedMessage, _>::new(
        config.rabbitmq.clone(),
        config.order_created.batch_config()?,
        OrderCreatedHandler::new(audit_client.clone()),
    );
    let mut order_status_changed = BatchConsumer::<OmsOrderStatusChangedMessage, _>::new(
        config.rabbitmq.clone(),
        config.order_status_changed.batch_config()?,
        OrderStatusChangedHandler::new(audit_client),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => error!(error = err.to_string(), "failure to listen for shutdown"),
            }
            shutdown.cancel();
        }
    });

    let (created, status_changed) = tokio::join!(
        order_created.start(&shutdown),
        order_status_changed.start(&shutdown)
    );
    if created.is_err() || status_changed.is_err() {
        tokio::join!(order_created.stop(), order_status_changed.stop());
        return startup_failure([created, status_changed]);
    }

    shutdown.cancelled().await;

    tokio::join!(order_created.stop(), order_status_changed.stop());

    Ok(())
}
