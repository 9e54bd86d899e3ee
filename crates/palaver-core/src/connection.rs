// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transient handle to one live connection.
//!
//! The gateway owns the socket; everything else pushes [`ServerEvent`]s
//! through the bounded queue behind this handle. Pushed events and request
//! replies share that one queue, so the socket sees them in the order they
//! were produced.
//!
//! A connection that cannot keep up is not allowed to skip events: the first
//! push that finds the queue full marks the handle lost, every later push
//! fails, and the gateway closes the socket. The client reconnects and
//! replays history instead of reading a stream with a gap in it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PalaverError;
use crate::events::ServerEvent;

/// One queued frame. `request_id` is set on replies to a request that
/// carried one.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub request_id: Option<String>,
    pub event: ServerEvent,
}

/// Cloneable sender side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    tx: mpsc::Sender<Outbound>,
    lost: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle with a fresh random id.
    pub fn new(tx: mpsc::Sender<Outbound>, lost: CancellationToken) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tx, lost)
    }

    pub fn with_id(
        id: impl Into<String>,
        tx: mpsc::Sender<Outbound>,
        lost: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            tx,
            lost,
        }
    }

    /// Create a handle together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        Self::channel_with(capacity, CancellationToken::new())
    }

    /// Like [`channel`](Self::channel), cancelling `lost` when the
    /// connection is dropped for falling behind.
    pub fn channel_with(
        capacity: usize,
        lost: CancellationToken,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, lost), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue an event without waiting.
    ///
    /// Fails with [`PalaverError::ConnectionLost`] if the connection is
    /// closed or lost. A full queue loses the connection.
    pub fn push(&self, event: ServerEvent) -> Result<(), PalaverError> {
        if self.lost.is_cancelled() {
            return Err(self.lost_error());
        }
        let outbound = Outbound {
            request_id: None,
            event,
        };
        self.tx.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(out) => {
                self.lost.cancel();
                PalaverError::ConnectionLost(format!(
                    "outbound queue full on {}, dropped {} and closing",
                    self.id,
                    out.event.name()
                ))
            }
            mpsc::error::TrySendError::Closed(_) => {
                PalaverError::ConnectionLost(format!("connection {} closed", self.id))
            }
        })
    }

    /// Queue the reply to a request, waiting for room.
    pub async fn reply(
        &self,
        request_id: Option<String>,
        event: ServerEvent,
    ) -> Result<(), PalaverError> {
        let outbound = Outbound { request_id, event };
        tokio::select! {
            sent = self.tx.send(outbound) => sent.map_err(|_| {
                PalaverError::ConnectionLost(format!("connection {} closed", self.id))
            }),
            _ = self.lost.cancelled() => Err(self.lost_error()),
        }
    }

    /// Mark the connection lost so its socket gets closed.
    pub fn close(&self) {
        self.lost.cancel();
    }

    /// True once the connection fell behind or was closed by the server.
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Returns true once the receiving end has been dropped or the
    /// connection is lost.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.is_lost()
    }

    fn lost_error(&self) -> PalaverError {
        PalaverError::ConnectionLost(format!("connection {} is closing", self.id))
    }
}
