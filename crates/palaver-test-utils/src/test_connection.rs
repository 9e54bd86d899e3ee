// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing connection for asserting on pushed server events.
//!
//! `TestConnection` owns the receiving end of a [`ConnectionHandle`]; tests
//! register the handle with the chat core and read back what it pushed.

use std::time::Duration;

use tokio::sync::mpsc;

use palaver_core::{ConnectionHandle, Outbound, ServerEvent};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A fake participant connection.
pub struct TestConnection {
    handle: ConnectionHandle,
    rx: mpsc::Receiver<Outbound>,
}

impl TestConnection {
    /// Create a connection with a generous buffer.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a connection whose outbound buffer holds `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (handle, rx) = ConnectionHandle::channel(capacity);
        Self { handle, rx }
    }

    /// A clone of the handle to register with the presence registry.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Wait for the next event, or `None` after a timeout.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
            .map(|out| out.event)
    }

    /// Wait for the first event matching `pred`, discarding the others.
    pub async fn recv_matching<F>(&mut self, mut pred: F) -> Option<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        while let Some(event) = self.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Wait for the first event with the given [`ServerEvent::name`].
    pub async fn recv_named(&mut self, name: &str) -> Option<ServerEvent> {
        self.recv_matching(|e| e.name() == name).await
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(out) = self.rx.try_recv() {
            events.push(out.event);
        }
        events
    }

    /// True once the handle was dropped for falling behind.
    pub fn is_lost(&self) -> bool {
        self.handle.is_lost()
    }

    /// Drop the receiver so pushes to this handle fail as on a dead socket.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Default for TestConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_pushed_events_in_order() {
        let mut conn = TestConnection::new();
        conn.handle().push(ServerEvent::Ping).unwrap();
        conn.handle().push(ServerEvent::Pong).unwrap();
        assert_eq!(conn.recv().await.map(|e| e.name()), Some("ping"));
        assert_eq!(conn.recv_named("pong").await.map(|e| e.name()), Some("pong"));
    }

    #[tokio::test]
    async fn drain_returns_queued_events() {
        let mut conn = TestConnection::new();
        for _ in 0..3 {
            conn.handle().push(ServerEvent::Ping).unwrap();
        }
        assert_eq!(conn.drain().len(), 3);
        assert!(conn.drain().is_empty());
    }

    #[tokio::test]
    async fn overflow_marks_connection_lost() {
        let mut conn = TestConnection::with_capacity(1);
        conn.handle().push(ServerEvent::Ping).unwrap();
        assert!(conn.handle().push(ServerEvent::Pong).is_err());
        assert!(conn.is_lost());
        assert_eq!(conn.drain(), vec![ServerEvent::Ping]);
    }

    #[tokio::test]
    async fn closed_connection_rejects_pushes() {
        let mut conn = TestConnection::new();
        conn.close();
        assert!(conn.handle().push(ServerEvent::Ping).is_err());
    }
}
