// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Batching Consumer
//!
//! `BatchConsumer` ties the pieces together for one queue: it opens a connection and a
//! channel, sets the prefetch, provisions the dead-letter topology, arms the flush
//! timer and starts consuming. Deliveries and timer ticks then compete for the
//! message buffer lock until the consumer is stopped.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`. A failed or
//! cancelled start goes straight back to `Stopped` and leaves nothing open.

use crate::{
    batch::Acknowledger,
    buffer::{log_flush_failure, MessageBuffer},
    channel,
    config::{BatchConfig, RabbitMqConfig},
    errors::AmqpError,
    handler::BatchHandler,
    message::BufferedMessage,
    topology,
};
use futures_util::{Stream, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel, Connection};
use serde::de::DeserializeOwned;
use std::{fmt::Display, future::Future, sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningConsumer<T, H> {
    connection: Arc<Connection>,
    channel: Arc<Channel>,
    buffer: Arc<MessageBuffer<T, H, Channel>>,
    timer_stop: CancellationToken,
    timer: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

/// Consumes one queue in batches of `T`, handing each batch to `H`.
///
/// `stop` has to be called to release the connection; dropping a running
/// consumer leaves its background tasks alive until the connection fails.
pub struct BatchConsumer<T, H> {
    rabbitmq: RabbitMqConfig,
    config: BatchConfig,
    handler: Arc<H>,
    state: ConsumerState,
    running: Option<RunningConsumer<T, H>>,
}

impl<T, H> BatchConsumer<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: BatchHandler<T> + 'static,
{
    /// Creates a stopped consumer.
    ///
    /// # Parameters
    /// * `rabbitmq` - The broker connection settings
    /// * `config` - The batching and dead-letter settings
    /// * `handler` - The handler called once per batch
    ///
    /// # Returns
    /// A new BatchConsumer in `ConsumerState::Stopped`
    pub fn new(rabbitmq: RabbitMqConfig, config: BatchConfig, handler: H) -> Self {
        BatchConsumer {
            rabbitmq,
            config,
            handler: Arc::new(handler),
            state: ConsumerState::Stopped,
            running: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Connects, provisions the topology and starts consuming.
    ///
    /// `cancel` only covers this startup sequence; once running, the consumer is
    /// stopped with `stop`.
    ///
    /// # Parameters
    /// * `cancel` - A token aborting the startup sequence
    ///
    /// # Errors
    /// Any connection, QoS, declaration or consumer registration failure, or
    /// `AmqpError::Cancelled`. The consumer is back in `Stopped` in every case.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), AmqpError> {
        if self.state != ConsumerState::Stopped {
            return Err(AmqpError::InvalidState(format!(
                "cannot start a consumer that is {:?}",
                self.state
            )));
        }

        self.transition(ConsumerState::Starting);

        match self.open(cancel).await {
            Ok(running) => {
                self.running = Some(running);
                self.transition(ConsumerState::Running);
                info!(
                    queue = self.config.queue(),
                    batch_size = self.config.batch_size(),
                    batch_timeout_ms = self.config.batch_timeout().as_millis() as u64,
                    "consumer started"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    queue = self.config.queue(),
                    error = err.to_string(),
                    "failure to start consumer"
                );
                self.transition(ConsumerState::Stopped);
                Err(err)
            }
        }
    }

    /// Stops consuming and closes the channel and connection.
    ///
    /// A batch already being processed is allowed to finish. Buffered messages
    /// that were not flushed yet are left to the broker, which redelivers them
    /// once the channel is closed.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!(queue = self.config.queue(), "consumer is not running");
            return;
        };

        self.transition(ConsumerState::Stopping);

        let dropped = running.buffer.close().await;

        running.timer_stop.cancel();
        if let Err(err) = running.timer.await {
            warn!(error = err.to_string(), "flush timer ended abnormally");
        }

        channel::close_channel(&running.channel).await;
        channel::close_connection(&running.connection).await;

        running.receiver.abort();
        if let Err(err) = running.receiver.await {
            if !err.is_cancelled() {
                warn!(error = err.to_string(), "receive loop ended abnormally");
            }
        }

        self.transition(ConsumerState::Stopped);
        info!(queue = self.config.queue(), dropped, "consumer stopped");
    }

    fn transition(&mut self, next: ConsumerState) {
        debug!(
            queue = self.config.queue(),
            from = ?self.state,
            to = ?next,
            "consumer state transition"
        );
        self.state = next;
    }

    async fn open(&self, cancel: &CancellationToken) -> Result<RunningConsumer<T, H>, AmqpError> {
        let (connection, channel) =
            until_cancelled(cancel, channel::new_amqp_channel(&self.rabbitmq)).await?;

        match self.prepare(&channel, cancel).await {
            Ok(consumer) => Ok(self.spawn(connection, channel, consumer)),
            Err(err) => {
                channel::close_connection(&connection).await;
                Err(err)
            }
        }
    }

    async fn prepare(
        &self,
        channel: &Arc<Channel>,
        cancel: &CancellationToken,
    ) -> Result<lapin::Consumer, AmqpError> {
        until_cancelled(
            cancel,
            channel::configure_qos(channel, self.config.prefetch_count()),
        )
        .await?;
        until_cancelled(cancel, topology::provision(channel.clone(), &self.config)).await?;
        until_cancelled(cancel, self.register(channel)).await
    }

    async fn register(&self, channel: &Channel) -> Result<lapin::Consumer, AmqpError> {
        let consumer_tag = format!("{}-{}", self.config.queue(), Uuid::new_v4());

        match channel
            .basic_consume(
                self.config.queue(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(
                    self.config.queue().to_owned(),
                ))
            }
            Ok(c) => {
                debug!(consumer_tag, "consumer registered");
                Ok(c)
            }
        }
    }

    fn spawn(
        &self,
        connection: Arc<Connection>,
        channel: Arc<Channel>,
        consumer: lapin::Consumer,
    ) -> RunningConsumer<T, H> {
        let buffer = Arc::new(MessageBuffer::new(
            &self.config,
            self.handler.clone(),
            channel.clone(),
        ));

        let timer_stop = CancellationToken::new();
        let timer = spawn_flush_timer(
            buffer.clone(),
            self.config.batch_timeout(),
            timer_stop.clone(),
        );

        let receiver = tokio::spawn(receive_loop(
            consumer.map(|result| result.map(BufferedMessage::from_delivery)),
            buffer.clone(),
            timer_stop.clone(),
            self.config.queue().to_owned(),
        ));

        RunningConsumer {
            connection,
            channel,
            buffer,
            timer_stop,
            timer,
            receiver,
        }
    }
}

/// Flushes `buffer` every `period` until `stop` is cancelled.
///
/// The first tick fires one full period after the timer is armed. A flush in
/// progress when `stop` is cancelled runs to completion.
pub(crate) fn spawn_flush_timer<T, H, A>(
    buffer: Arc<MessageBuffer<T, H, A>>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
    H: BatchHandler<T> + 'static,
    A: Acknowledger + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => log_flush_failure(&buffer.flush_on_timeout().await),
            }
        }

        debug!("flush timer stopped");
    })
}

/// Appends every received message to `buffer` until the delivery stream ends.
///
/// Once consuming, the stream only ends on its own when the broker closes the
/// channel or the connection. Unless `stop` closed the buffer first, the
/// consumer can no longer receive nor settle anything, so the flush timer is
/// stopped and the loss is reported.
pub(crate) async fn receive_loop<S, E, T, H, A>(
    mut deliveries: S,
    buffer: Arc<MessageBuffer<T, H, A>>,
    timer_stop: CancellationToken,
    queue: String,
) where
    S: Stream<Item = Result<BufferedMessage, E>> + Unpin,
    E: Display,
    T: DeserializeOwned + Send + 'static,
    H: BatchHandler<T> + 'static,
    A: Acknowledger + 'static,
{
    while let Some(result) = deliveries.next().await {
        match result {
            Ok(message) => log_flush_failure(&buffer.append(message).await),
            Err(err) => error!(error = err.to_string(), "errors consume msg"),
        }
    }

    if buffer.is_closed().await {
        debug!(%queue, "delivery stream ended");
        return;
    }

    let pending = buffer.len().await;
    error!(
        %queue,
        pending,
        "delivery stream ended while running, channel or connection closed by the broker"
    );
    timer_stop.cancel();
}

async fn until_cancelled<F, R>(cancel: &CancellationToken, fut: F) -> Result<R, AmqpError>
where
    F: Future<Output = Result<R, AmqpError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AmqpError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::MockAcknowledger, config::DeadLetterSettings, errors::HandlerError};
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize)]
    struct Probe {
        id: u64,
    }

    fn config(batch_size: usize, timeout: Duration) -> BatchConfig {
        BatchConfig::new(
            "orders",
            batch_size,
            timeout,
            DeadLetterSettings::new("orders.dlx", "orders.dlq", "orders"),
        )
        .unwrap()
    }

    fn unreachable_broker() -> RabbitMqConfig {
        RabbitMqConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            connection_name: "test".to_owned(),
        }
    }

    fn noop_handler() -> impl Fn(Vec<Probe>) -> std::future::Ready<Result<(), HandlerError>> {
        |_| std::future::ready(Ok(()))
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch_after_timeout() {
        let seen = Arc::new(Mutex::new(vec![]));
        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .withf(|tag, multiple| *tag == 2 && *multiple)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = {
            let seen = seen.clone();
            move |batch: Vec<Probe>| {
                seen.lock()
                    .unwrap()
                    .push(batch.iter().map(|p| p.id).collect::<Vec<_>>());
                std::future::ready(Ok::<(), HandlerError>(()))
            }
        };
        let buffer = Arc::new(MessageBuffer::<Probe, _, _>::new(
            &config(10, Duration::from_secs(5)),
            Arc::new(handler),
            Arc::new(acker),
        ));
        let stop = CancellationToken::new();
        let timer = spawn_flush_timer(buffer.clone(), Duration::from_secs(5), stop.clone());

        buffer.append(BufferedMessage::new(1, br#"{"id":1}"#.to_vec())).await;
        buffer.append(BufferedMessage::new(2, br#"{"id":2}"#.to_vec())).await;

        time::sleep(Duration::from_secs(4)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(buffer.len().await, 2);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2]]);
        assert!(buffer.is_empty().await);

        // later ticks find the buffer empty and do nothing
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        stop.cancel();
        timer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_never_flushes_an_empty_buffer() {
        let buffer = Arc::new(MessageBuffer::<Probe, _, _>::new(
            &config(10, Duration::from_secs(1)),
            Arc::new(noop_handler()),
            Arc::new(MockAcknowledger::new()),
        ));
        let stop = CancellationToken::new();
        let timer = spawn_flush_timer(buffer.clone(), Duration::from_secs(1), stop.clone());

        time::sleep(Duration::from_secs(30)).await;

        stop.cancel();
        timer.await.unwrap();
    }

    fn json(tag: u64) -> Result<BufferedMessage, String> {
        Ok(BufferedMessage::new(
            tag,
            format!(r#"{{"id":{}}}"#, tag).into_bytes(),
        ))
    }

    #[tokio::test]
    async fn receive_loop_flushes_full_batches() {
        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .withf(|tag, multiple| *tag == 2 && *multiple)
            .times(1)
            .returning(|_, _| Ok(()));

        let buffer = Arc::new(MessageBuffer::<Probe, _, _>::new(
            &config(2, Duration::from_secs(5)),
            Arc::new(noop_handler()),
            Arc::new(acker),
        ));
        let timer_stop = CancellationToken::new();

        receive_loop(
            futures_util::stream::iter(vec![json(1), json(2), json(3)]),
            buffer.clone(),
            timer_stop.clone(),
            "orders".to_owned(),
        )
        .await;

        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn stream_ending_while_running_stops_the_timer() {
        let buffer = Arc::new(MessageBuffer::<Probe, _, _>::new(
            &config(10, Duration::from_secs(5)),
            Arc::new(noop_handler()),
            Arc::new(MockAcknowledger::new()),
        ));
        let timer_stop = CancellationToken::new();

        receive_loop(
            futures_util::stream::iter(vec![json(1), Err("connection reset".to_owned()), json(2)]),
            buffer.clone(),
            timer_stop.clone(),
            "orders".to_owned(),
        )
        .await;

        assert!(timer_stop.is_cancelled());
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn stream_ending_after_close_leaves_the_timer_to_stop() {
        let buffer = Arc::new(MessageBuffer::<Probe, _, _>::new(
            &config(10, Duration::from_secs(5)),
            Arc::new(noop_handler()),
            Arc::new(MockAcknowledger::new()),
        ));
        buffer.close().await;
        let timer_stop = CancellationToken::new();

        receive_loop(
            futures_util::stream::iter(vec![json(1)]),
            buffer.clone(),
            timer_stop.clone(),
            "orders".to_owned(),
        )
        .await;

        assert!(!timer_stop.is_cancelled());
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_start_returns_to_stopped() {
        let mut consumer = BatchConsumer::<Probe, _>::new(
            unreachable_broker(),
            config(10, Duration::from_secs(5)),
            noop_handler(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(consumer.start(&cancel).await, Err(AmqpError::Cancelled));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn failed_connection_returns_to_stopped() {
        let mut consumer = BatchConsumer::<Probe, _>::new(
            unreachable_broker(),
            config(10, Duration::from_secs(5)),
            noop_handler(),
        );

        let result = consumer.start(&CancellationToken::new()).await;

        assert_eq!(result, Err(AmqpError::ConnectionError));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn stopping_a_stopped_consumer_is_a_no_op() {
        let mut consumer = BatchConsumer::<Probe, _>::new(
            unreachable_broker(),
            config(10, Duration::from_secs(5)),
            noop_handler(),
        );

        consumer.stop().await;

        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }
}
