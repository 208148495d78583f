// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Client for the audit-log service's bulk endpoint.
//!
//! A batch rejected to the dead-letter queue may be replayed later, so the
//! service is expected to tolerate entries it has already stored.

use crate::errors::HandlerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const LOG_ORDER_PATH: &str = "/api/v1/audit/log-order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogOrder {
    pub order_id: i64,
    pub order_item_id: i64,
    pub customer_id: i64,
    pub order_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V1AuditLogOrderRequest {
    pub orders: Vec<AuditLogOrder>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLogClient: Send + Sync {
    /// Stores every entry of `request` in one call.
    async fn log_order(&self, request: &V1AuditLogOrderRequest) -> Result<(), HandlerError>;
}

pub struct HttpAuditLogClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuditLogClient {
    /// Creates a client posting to the audit-log service at `base_address`.
    ///
    /// # Parameters
    /// * `base_address` - The service base URL, with or without a trailing slash
    ///
    /// # Returns
    /// A new HttpAuditLogClient instance
    pub fn new(base_address: &str) -> HttpAuditLogClient {
        HttpAuditLogClient::with_client(reqwest::Client::new(), base_address)
    }

    pub fn with_client(client: reqwest::Client, base_address: &str) -> HttpAuditLogClient {
        HttpAuditLogClient {
            client,
            endpoint: format!("{}{}", base_address.trim_end_matches('/'), LOG_ORDER_PATH),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuditLogClient for HttpAuditLogClient {
    async fn log_order(&self, request: &V1AuditLogOrderRequest) -> Result<(), HandlerError> {
        debug!(
            endpoint = %self.endpoint,
            entries = request.orders.len(),
            "sending audit log entries"
        );

        self.client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
