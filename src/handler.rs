// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Batch Handlers
//!
//! A `BatchHandler` holds the only per-message-type logic of a consumer. It gets the
//! decoded messages of one batch, in delivery order, and reports success or failure.
//! It never sees delivery tags: acknowledging or rejecting the batch with the broker
//! is done by the batch processor according to the outcome.
//!
//! Async closures taking `Vec<T>` are handlers too:
//!
//! ```rust,ignore
//! let handler = |orders: Vec<OmsOrderStatusChangedMessage>| async move {
//!     println!("{} status changes", orders.len());
//!     Ok::<_, HandlerError>(())
//! };
//! ```

use crate::errors::HandlerError;
use async_trait::async_trait;
use std::future::Future;

#[async_trait]
pub trait BatchHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Processes one batch. Called exactly once per batch.
    async fn handle(&self, messages: Vec<T>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F, Fut> BatchHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, messages: Vec<T>) -> Result<(), HandlerError> {
        (self)(messages).await
    }
}
