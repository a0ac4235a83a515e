// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AMQP ingress: consumes the notification fan-out exchange and injects
//! deliveries into the dispatcher as publish events.
//!
//! The exchange is fan-out, so the queue name is free for producers; multiple
//! queues may be bound later if traffic warrants it.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use serde::Deserialize;

use crate::dispatch::{DispatcherHandle, Message};

pub const NOTIFICATIONS_EXCHANGE: &str = "siphon.apps.notifications";
pub const NOTIFICATIONS_QUEUE: &str = "siphon.apps.notifications-queue";
const CONSUMER_TAG: &str = "siphon-streamer";

/// Delay between reconnect attempts after any broker failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Spawn the notification consumer as a background task.
pub fn spawn_notification_consumer(dispatcher: DispatcherHandle, uri: String) {
    tokio::spawn(run_consumer(dispatcher, uri));
}

/// Connect-declare-consume forever, sleeping between attempts. Connection
/// close surfaces as the delivery stream ending and takes the same retry
/// path as a failed dial.
async fn run_consumer(dispatcher: DispatcherHandle, uri: String) {
    loop {
        if let Err(e) = consume(&dispatcher, &uri).await {
            tracing::warn!(
                err = %e,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "notification consumer stopped, retrying"
            );
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn consume(dispatcher: &DispatcherHandle, uri: &str) -> anyhow::Result<()> {
    tracing::info!(uri, "dialing broker");
    let conn = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;

    let exchange_opts = ExchangeDeclareOptions { durable: true, ..Default::default() };
    channel
        .exchange_declare(
            NOTIFICATIONS_EXCHANGE,
            ExchangeKind::Fanout,
            exchange_opts,
            FieldTable::default(),
        )
        .await?;

    let queue_opts = QueueDeclareOptions { durable: true, ..Default::default() };
    let queue = channel
        .queue_declare(NOTIFICATIONS_QUEUE, queue_opts, FieldTable::default())
        .await?;
    tracing::info!(
        queue = queue.name().as_str(),
        messages = queue.message_count(),
        consumers = queue.consumer_count(),
        "declared queue, binding to exchange"
    );

    // Binding key is ignored by fan-out exchanges.
    channel
        .queue_bind(
            NOTIFICATIONS_QUEUE,
            NOTIFICATIONS_EXCHANGE,
            "bind",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let consume_opts = BasicConsumeOptions { no_ack: true, ..Default::default() };
    let mut deliveries = channel
        .basic_consume(NOTIFICATIONS_QUEUE, CONSUMER_TAG, consume_opts, FieldTable::default())
        .await?;
    tracing::info!(consumer_tag = CONSUMER_TAG, "consuming notifications");

    while let Some(delivery) = deliveries.next().await {
        let delivery = delivery?;
        handle_delivery(dispatcher, delivery.data).await;
    }

    anyhow::bail!("broker connection closed")
}

/// Shape of a notification delivery body. The body itself is forwarded
/// verbatim, never re-encoded.
#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Validate one delivery and inject it as a publish event. Bad deliveries are
/// logged and dropped without tearing down the consumer.
async fn handle_delivery(dispatcher: &DispatcherHandle, body: Vec<u8>) {
    let envelope: NotificationEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(err = %e, "dropping malformed notification");
            return;
        }
    };

    if envelope.kind.is_empty() || envelope.app_id.is_empty() {
        tracing::warn!("dropping notification with empty type or app_id");
        return;
    }

    dispatcher
        .publish_notification(Message {
            app_id: envelope.app_id,
            user_id: envelope.user_id,
            payload: Bytes::from(body),
        })
        .await;
}

#[cfg(test)]
#[path = "amqp_sub_tests.rs"]
mod tests;
