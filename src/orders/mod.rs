// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Audit Consumers
//!
//! The two consumers of the order management system's events. Both turn a batch of
//! events into one bulk request to the audit-log service.

pub mod audit;
pub mod handlers;
pub mod messages;

pub use audit::{AuditLogClient, AuditLogOrder, HttpAuditLogClient, V1AuditLogOrderRequest};
pub use handlers::{OrderCreatedHandler, OrderStatusChangedHandler};
pub use messages::{OmsOrderCreatedMessage, OmsOrderItem, OmsOrderStatusChangedMessage};
