// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::handle_delivery;
use crate::dispatch::{ConnectionRole, Dispatcher, DispatcherHandle};
use crate::session::SessionHandle;

/// Dispatcher with a registered notification subscriber for `app1`/`u1`.
async fn dispatcher_with_subscriber() -> (DispatcherHandle, mpsc::Receiver<Bytes>) {
    let (dispatcher, handle) = Dispatcher::new();
    tokio::spawn(dispatcher.run());

    let (session, rx) = SessionHandle::new(
        ConnectionRole::Notifications,
        "app1".to_owned(),
        "u1".to_owned(),
        SocketAddr::from(([127, 0, 0, 1], 9)),
    );
    handle.register(session).await;
    (handle, rx)
}

async fn recv(rx: &mut mpsc::Receiver<Bytes>) -> anyhow::Result<Bytes> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("channel closed"))
}

const SENTINEL: &[u8] = br#"{"app_id":"app1","user_id":"u1","type":"sentinel"}"#;

#[tokio::test]
async fn valid_delivery_is_forwarded_verbatim() -> anyhow::Result<()> {
    let (handle, mut rx) = dispatcher_with_subscriber().await;
    // Field order and whitespace must survive: the body is not re-encoded.
    let body = br#"{ "type": "chat", "user_id": "u1", "app_id": "app1" }"#;

    handle_delivery(&handle, body.to_vec()).await;

    assert_eq!(recv(&mut rx).await?, Bytes::from_static(body));
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_dropped() -> anyhow::Result<()> {
    let (handle, mut rx) = dispatcher_with_subscriber().await;

    handle_delivery(&handle, b"not json".to_vec()).await;
    handle_delivery(&handle, SENTINEL.to_vec()).await;

    assert_eq!(recv(&mut rx).await?, Bytes::from_static(SENTINEL));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn empty_type_is_dropped() -> anyhow::Result<()> {
    let (handle, mut rx) = dispatcher_with_subscriber().await;

    handle_delivery(&handle, br#"{"app_id":"app1","user_id":"u1","type":""}"#.to_vec()).await;
    handle_delivery(&handle, br#"{"app_id":"app1","user_id":"u1"}"#.to_vec()).await;
    handle_delivery(&handle, SENTINEL.to_vec()).await;

    assert_eq!(recv(&mut rx).await?, Bytes::from_static(SENTINEL));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn empty_app_id_is_dropped() -> anyhow::Result<()> {
    let (handle, mut rx) = dispatcher_with_subscriber().await;

    handle_delivery(&handle, br#"{"app_id":"","user_id":"u1","type":"chat"}"#.to_vec()).await;
    handle_delivery(&handle, br#"{"user_id":"u1","type":"chat"}"#.to_vec()).await;
    handle_delivery(&handle, SENTINEL.to_vec()).await;

    assert_eq!(recv(&mut rx).await?, Bytes::from_static(SENTINEL));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn missing_user_id_is_still_forwarded() -> anyhow::Result<()> {
    let (handle, mut rx) = dispatcher_with_subscriber().await;
    let body = br#"{"app_id":"app1","type":"chat"}"#;

    handle_delivery(&handle, body.to_vec()).await;

    // Routed by app_id alone; sandbox listeners for an empty user simply
    // don't exist.
    assert_eq!(recv(&mut rx).await?, Bytes::from_static(body));
    Ok(())
}
