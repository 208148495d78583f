// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::{
    audit::{AuditLogClient, AuditLogOrder, V1AuditLogOrderRequest},
    messages::{OmsOrderCreatedMessage, OmsOrderStatusChangedMessage},
};
use crate::{errors::HandlerError, handler::BatchHandler};
use async_trait::async_trait;
use std::sync::Arc;

/// Status recorded for every item of a newly created order.
pub const ORDER_STATUS_CREATED: &str = "Created";

/// Records one `Created` audit entry per order item.
pub struct OrderCreatedHandler<C> {
    client: Arc<C>,
}

impl<C> OrderCreatedHandler<C> {
    pub fn new(client: Arc<C>) -> Self {
        OrderCreatedHandler { client }
    }
}

#[async_trait]
impl<C> BatchHandler<OmsOrderCreatedMessage> for OrderCreatedHandler<C>
where
    C: AuditLogClient,
{
    async fn handle(&self, messages: Vec<OmsOrderCreatedMessage>) -> Result<(), HandlerError> {
        let orders = messages
            .iter()
            .flat_map(|order| {
                order.order_items.iter().map(|item| AuditLogOrder {
                    order_id: order.id,
                    order_item_id: item.id,
                    customer_id: order.customer_id,
                    order_status: ORDER_STATUS_CREATED.to_owned(),
                })
            })
            .collect();

        self.client
            .log_order(&V1AuditLogOrderRequest { orders })
            .await
    }
}

/// Records the new status of every changed order item.
pub struct OrderStatusChangedHandler<C> {
    client: Arc<C>,
}

impl<C> OrderStatusChangedHandler<C> {
    pub fn new(client: Arc<C>) -> Self {
        OrderStatusChangedHandler { client }
    }
}

#[async_trait]
impl<C> BatchHandler<OmsOrderStatusChangedMessage> for OrderStatusChangedHandler<C>
where
    C: AuditLogClient,
{
    async fn handle(
        &self,
        messages: Vec<OmsOrderStatusChangedMessage>,
    ) -> Result<(), HandlerError> {
        let orders = messages
            .into_iter()
            .map(|msg| AuditLogOrder {
                order_id: msg.order_id,
                order_item_id: msg.order_item_id,
                customer_id: msg.customer_id,
                order_status: msg.order_status,
            })
            .collect();

        self.client
            .log_order(&V1AuditLogOrderRequest { orders })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{audit::MockAuditLogClient, messages::OmsOrderItem};

    fn item(id: i64, order_id: i64) -> OmsOrderItem {
        OmsOrderItem {
            id,
            order_id,
            product_id: 100 + id,
            quantity: 1,
            product_title: format!("product {}", id),
            product_url: format!("https://shop.example/{}", id),
            price_cents: 1000,
            price_currency: "RUB".to_owned(),
        }
    }

    fn order(id: i64, customer_id: i64, items: Vec<OmsOrderItem>) -> OmsOrderCreatedMessage {
        OmsOrderCreatedMessage {
            id,
            customer_id,
            delivery_address: "Lenina 1".to_owned(),
            total_price_cents: 1000 * items.len() as i64,
            total_price_currency: "RUB".to_owned(),
            order_items: items,
        }
    }

    fn entry(order_id: i64, order_item_id: i64, customer_id: i64, status: &str) -> AuditLogOrder {
        AuditLogOrder {
            order_id,
            order_item_id,
            customer_id,
            order_status: status.to_owned(),
        }
    }

    #[tokio::test]
    async fn created_orders_are_flattened_into_one_request() {
        let mut client = MockAuditLogClient::new();
        client
            .expect_log_order()
            .withf(|request| {
                request.orders
                    == vec![
                        entry(1, 11, 7, "Created"),
                        entry(1, 12, 7, "Created"),
                        entry(2, 21, 8, "Created"),
                    ]
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = OrderCreatedHandler::new(Arc::new(client));

        handler
            .handle(vec![
                order(1, 7, vec![item(11, 1), item(12, 1)]),
                order(2, 8, vec![item(21, 2)]),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn status_changes_keep_their_status() {
        let mut client = MockAuditLogClient::new();
        client
            .expect_log_order()
            .withf(|request| {
                request.orders == vec![entry(1, 11, 7, "Processing"), entry(2, 21, 8, "Cancelled")]
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = OrderStatusChangedHandler::new(Arc::new(client));

        handler
            .handle(vec![
                OmsOrderStatusChangedMessage {
                    order_id: 1,
                    order_item_id: 11,
                    customer_id: 7,
                    order_status: "Processing".to_owned(),
                },
                OmsOrderStatusChangedMessage {
                    order_id: 2,
                    order_item_id: 21,
                    customer_id: 8,
                    order_status: "Cancelled".to_owned(),
                },
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn client_failure_fails_the_batch() {
        let mut client = MockAuditLogClient::new();
        client
            .expect_log_order()
            .times(1)
            .returning(|_| Err(HandlerError::failed("audit log unavailable")));

        let handler = OrderStatusChangedHandler::new(Arc::new(client));

        let result = handler
            .handle(vec![OmsOrderStatusChangedMessage {
                order_id: 1,
                order_item_id: 11,
                customer_id: 7,
                order_status: "Completed".to_owned(),
            }])
            .await;

        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }
}
