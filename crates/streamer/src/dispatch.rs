// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-writer dispatcher owning the routing table.
//!
//! All register/unregister/publish traffic funnels through one event channel
//! consumed by [`Dispatcher::run`]; the four routing buckets are never touched
//! from any other task. Broker deliveries enter through the same channel as
//! session-originated messages, so every mutation and every fan-out is
//! serialized.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::session::SessionHandle;

/// Subscription role of a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Notifications,
    LogReader,
    LogWriter,
}

impl ConnectionRole {
    /// Parse the `type` query parameter.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notifications" => Some(Self::Notifications),
            "log_reader" => Some(Self::LogReader),
            "log_writer" => Some(Self::LogWriter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::LogReader => "log_reader",
            Self::LogWriter => "log_writer",
        }
    }
}

/// Sessions whose handshake claim carries this app id subscribe user-wide
/// (sandbox listeners), keyed by `user_id` instead of `app_id`.
pub const WILDCARD_APP_ID: &str = "*";

/// A routed payload. The payload is opaque and forwarded byte-for-byte.
#[derive(Debug, Clone)]
pub struct Message {
    pub app_id: String,
    pub user_id: String,
    pub payload: Bytes,
}

/// Events consumed by the dispatcher loop.
pub enum StreamEvent {
    Register(Arc<SessionHandle>),
    Unregister(Arc<SessionHandle>),
    PublishNotification(Message),
    PublishLog(Message),
}

const EVENT_QUEUE_DEPTH: usize = 256;

/// Cloneable submission side of the dispatcher's event queue.
///
/// Held by the upgrade entry point, the broker ingress, and every session's
/// read pump; this is the only way anything reaches the routing table.
#[derive(Clone)]
pub struct DispatcherHandle {
    events: mpsc::Sender<StreamEvent>,
}

impl DispatcherHandle {
    pub async fn register(&self, session: Arc<SessionHandle>) {
        let _ = self.events.send(StreamEvent::Register(session)).await;
    }

    pub async fn unregister(&self, session: Arc<SessionHandle>) {
        let _ = self.events.send(StreamEvent::Unregister(session)).await;
    }

    pub async fn publish_notification(&self, msg: Message) {
        let _ = self.events.send(StreamEvent::PublishNotification(msg)).await;
    }

    pub async fn publish_log(&self, msg: Message) {
        let _ = self.events.send(StreamEvent::PublishLog(msg)).await;
    }
}

type Bucket = HashMap<String, Vec<Arc<SessionHandle>>>;

/// Routing table: app/user keys to subscriber sets, one bucket per role.
///
/// A session lives in exactly one bucket, determined by its role and the
/// wildcard test on its app id. Duplicates are forbidden; emptied keys are
/// dropped from the map.
#[derive(Default)]
struct Routes {
    notifs_by_app: Bucket,
    notifs_by_user: Bucket,
    log_readers_by_app: Bucket,
    log_writers_by_app: Bucket,
}

impl Routes {
    /// The (bucket, key) a session indexes under. Identity is immutable, so
    /// insert and remove always resolve to the same slot.
    fn slot<'a>(&'a mut self, session: &'a SessionHandle) -> (&'a mut Bucket, &'a str) {
        match session.role {
            ConnectionRole::Notifications if session.app_id == WILDCARD_APP_ID => {
                (&mut self.notifs_by_user, session.user_id.as_str())
            }
            ConnectionRole::Notifications => (&mut self.notifs_by_app, session.app_id.as_str()),
            ConnectionRole::LogReader => (&mut self.log_readers_by_app, session.app_id.as_str()),
            ConnectionRole::LogWriter => (&mut self.log_writers_by_app, session.app_id.as_str()),
        }
    }

    fn insert(&mut self, session: &Arc<SessionHandle>) {
        let id = session.id;
        let (bucket, key) = self.slot(session);
        let entries = bucket.entry(key.to_owned()).or_default();
        if entries.iter().any(|s| s.id == id) {
            return;
        }
        entries.push(Arc::clone(session));
    }

    fn remove(&mut self, session: &SessionHandle) {
        let id = session.id;
        let (bucket, key) = self.slot(session);
        let emptied = match bucket.get_mut(key) {
            Some(entries) => {
                entries.retain(|s| s.id != id);
                entries.is_empty()
            }
            None => false,
        };
        if emptied {
            bucket.remove(key);
        }
    }

    /// Subscribers for a notification: sandbox listeners for the user first,
    /// then app-scoped subscribers.
    fn notification_subscribers<'a>(
        &'a self,
        msg: &Message,
    ) -> impl Iterator<Item = &'a Arc<SessionHandle>> + 'a {
        let sandbox = self.notifs_by_user.get(&msg.user_id).map(Vec::as_slice).unwrap_or(&[]);
        let scoped = self.notifs_by_app.get(&msg.app_id).map(Vec::as_slice).unwrap_or(&[]);
        sandbox.iter().chain(scoped.iter())
    }

    fn log_subscribers<'a>(&'a self, app_id: &str) -> impl Iterator<Item = &'a Arc<SessionHandle>> + 'a {
        self.log_readers_by_app.get(app_id).map(Vec::as_slice).unwrap_or(&[]).iter()
    }
}

/// The dispatcher actor. Constructed at startup and handed to the transport
/// layer and broker ingress through its [`DispatcherHandle`].
pub struct Dispatcher {
    events: mpsc::Receiver<StreamEvent>,
    routes: Routes,
}

impl Dispatcher {
    pub fn new() -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (Self { events: rx, routes: Routes::default() }, DispatcherHandle { events: tx })
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("dispatcher running");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Register(session) => self.register(&session),
            StreamEvent::Unregister(session) => self.unregister(&session),
            StreamEvent::PublishNotification(msg) => self.dispatch_notification(&msg),
            StreamEvent::PublishLog(msg) => self.dispatch_log(&msg),
        }
    }

    fn register(&mut self, session: &Arc<SessionHandle>) {
        self.routes.insert(session);
        tracing::info!(
            session = session.id,
            role = session.role.as_str(),
            app_id = %session.app_id,
            user_id = %session.user_id,
            remote_addr = %session.remote_addr,
            "connection registered"
        );
    }

    fn unregister(&mut self, session: &SessionHandle) {
        self.routes.remove(session);
        // Idempotent: stops the write pump and closes the outbound queue.
        session.cancel.cancel();
        tracing::info!(session = session.id, role = session.role.as_str(), "connection unregistered");
    }

    fn dispatch_notification(&self, msg: &Message) {
        tracing::debug!(app_id = %msg.app_id, user_id = %msg.user_id, "broadcasting notification");
        for session in self.routes.notification_subscribers(msg) {
            session.enqueue(msg.payload.clone());
        }
    }

    fn dispatch_log(&self, msg: &Message) {
        tracing::debug!(app_id = %msg.app_id, "broadcasting log");
        for session in self.routes.log_subscribers(&msg.app_id) {
            session.enqueue(msg.payload.clone());
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
