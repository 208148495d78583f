// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Tests against a live broker, configured through the `RABBITMQ_*` variables.
//!
//! Run with `cargo test -- --ignored`.

use envconfig::Envconfig;
use lapin::{
    options::{
        BasicGetOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
        ExchangeDeleteOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use rabbitmq_batch::{
    channel::{close_connection, new_amqp_channel},
    topology, BatchConfig, BatchConsumer, ConsumerState, DeadLetterSettings, HandlerError,
    RabbitMqConfig,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct Probe {
    id: u64,
}

fn broker() -> RabbitMqConfig {
    RabbitMqConfig::init_from_env().unwrap()
}

fn batch_config(batch_size: usize, timeout: Duration) -> BatchConfig {
    let queue = format!("batch-test-{}", Uuid::new_v4());

    BatchConfig::new(
        &queue,
        batch_size,
        timeout,
        DeadLetterSettings::new(&format!("{}.dlx", queue), &format!("{}.dlq", queue), &queue),
    )
    .unwrap()
}

async fn publish(channel: &Channel, queue: &str, id: u64) {
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            format!(r#"{{"id":{}}}"#, id).as_bytes(),
            BasicProperties::default(),
        )
        .await
        .unwrap()
        .await
        .unwrap();
}

async fn message_count(channel: &Channel, queue: &str) -> u32 {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap()
        .message_count()
}

async fn wait_for_count(channel: &Channel, queue: &str, expected: u32) {
    for _ in 0..50 {
        if message_count(channel, queue).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    panic!("queue {} never reached {} messages", queue, expected);
}

async fn cleanup(channel: &Channel, cfg: &BatchConfig) {
    for queue in [cfg.queue(), cfg.dead_letter().queue.as_str()] {
        let _ = channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await;
    }
    let _ = channel
        .exchange_delete(&cfg.dead_letter().exchange, ExchangeDeleteOptions::default())
        .await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn provisions_dead_letter_topology() {
    let cfg = batch_config(10, Duration::from_secs(5));
    let (connection, channel) = new_amqp_channel(&broker()).await.unwrap();

    topology::provision(channel.clone(), &cfg).await.unwrap();
    // declaring the same topology again is harmless
    topology::provision(channel.clone(), &cfg).await.unwrap();

    channel
        .exchange_declare(
            &cfg.dead_letter().exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                passive: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    assert_eq!(message_count(&channel, &cfg.dead_letter().queue).await, 0);

    // a message rejected on the main queue must reach the dead-letter queue
    publish(&channel, cfg.queue(), 1).await;
    wait_for_count(&channel, cfg.queue(), 1).await;

    let msg = channel
        .basic_get(cfg.queue(), BasicGetOptions { no_ack: false })
        .await
        .unwrap()
        .expect("published message");
    channel
        .basic_nack(
            msg.delivery.delivery_tag,
            BasicNackOptions {
                multiple: false,
                requeue: false,
            },
        )
        .await
        .unwrap();

    wait_for_count(&channel, &cfg.dead_letter().queue, 1).await;

    cleanup(&channel, &cfg).await;
    close_connection(&connection).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn full_batch_is_handled_and_acked() {
    let cfg = batch_config(3, Duration::from_secs(30));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut consumer = BatchConsumer::<Probe, _>::new(broker(), cfg.clone(), move |batch: Vec<Probe>| {
        let tx = tx.clone();
        async move {
            tx.send(batch.iter().map(|p| p.id).collect::<Vec<_>>())
                .map_err(|err| HandlerError::failed(err.to_string()))
        }
    });
    consumer.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(consumer.state(), ConsumerState::Running);

    let (connection, channel) = new_amqp_channel(&broker()).await.unwrap();
    for id in 1..=3 {
        publish(&channel, cfg.queue(), id).await;
    }

    let batch = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch, vec![1, 2, 3]);

    consumer.stop().await;
    assert_eq!(consumer.state(), ConsumerState::Stopped);

    wait_for_count(&channel, cfg.queue(), 0).await;
    assert_eq!(message_count(&channel, &cfg.dead_letter().queue).await, 0);

    cleanup(&channel, &cfg).await;
    close_connection(&connection).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn partial_batch_is_flushed_by_the_timer() {
    let cfg = batch_config(10, Duration::from_secs(1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut consumer = BatchConsumer::<Probe, _>::new(broker(), cfg.clone(), move |batch: Vec<Probe>| {
        let tx = tx.clone();
        async move {
            tx.send(batch.len())
                .map_err(|err| HandlerError::failed(err.to_string()))
        }
    });
    consumer.start(&CancellationToken::new()).await.unwrap();

    let (connection, channel) = new_amqp_channel(&broker()).await.unwrap();
    publish(&channel, cfg.queue(), 1).await;
    publish(&channel, cfg.queue(), 2).await;

    let size = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(size, 2);

    consumer.stop().await;
    wait_for_count(&channel, cfg.queue(), 0).await;

    cleanup(&channel, &cfg).await;
    close_connection(&connection).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn failed_batch_is_dead_lettered() {
    let cfg = batch_config(2, Duration::from_secs(30));

    let mut consumer = BatchConsumer::<Probe, _>::new(broker(), cfg.clone(), |_: Vec<Probe>| async {
        Err::<(), HandlerError>(HandlerError::failed("audit log unavailable"))
    });
    consumer.start(&CancellationToken::new()).await.unwrap();

    let (connection, channel) = new_amqp_channel(&broker()).await.unwrap();
    publish(&channel, cfg.queue(), 1).await;
    publish(&channel, cfg.queue(), 2).await;

    wait_for_count(&channel, &cfg.dead_letter().queue, 2).await;

    consumer.stop().await;
    assert_eq!(message_count(&channel, cfg.queue()).await, 0);

    cleanup(&channel, &cfg).await;
    close_connection(&connection).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn starting_twice_is_rejected() {
    let cfg = batch_config(2, Duration::from_secs(30));
    let mut consumer = BatchConsumer::<Probe, _>::new(broker(), cfg.clone(), |_: Vec<Probe>| async {
        Ok::<(), HandlerError>(())
    });

    consumer.start(&CancellationToken::new()).await.unwrap();
    assert!(consumer.start(&CancellationToken::new()).await.is_err());
    assert_eq!(consumer.state(), ConsumerState::Running);

    consumer.stop().await;

    let (connection, channel) = new_amqp_channel(&broker()).await.unwrap();
    cleanup(&channel, &cfg).await;
    close_connection(&connection).await;
}
