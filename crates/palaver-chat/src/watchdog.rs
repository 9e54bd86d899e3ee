// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation idle timers.
//!
//! Each armed conversation gets one task sleeping until its deadline. A
//! `watch` channel carries the deadline so `touch` is a single store, not a
//! respawn. Dropping the sender (disarm) stops the task. Expired conversation
//! ids are sent to a single consumer, which owns the actual state change.

use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

pub struct IdleWatchdog {
    timeout: Duration,
    timers: DashMap<String, watch::Sender<Instant>>,
    expired_tx: mpsc::UnboundedSender<String>,
    expired_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl IdleWatchdog {
    pub fn new(timeout: Duration) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Self {
            timeout,
            timers: DashMap::new(),
            expired_tx,
            expired_rx: Mutex::new(Some(expired_rx)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) the full idle period for a conversation.
    pub fn arm(&self, conversation_id: &str) {
        self.arm_until(conversation_id, Instant::now() + self.timeout);
    }

    /// Start a timer that fires at `deadline`. Replaces any existing timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_until(&self, conversation_id: &str, deadline: Instant) {
        let (tx, mut rx) = watch::channel(deadline);
        // Dropping a replaced sender ends its task.
        self.timers.insert(conversation_id.to_string(), tx);

        let expired_tx = self.expired_tx.clone();
        let id = conversation_id.to_string();
        tokio::spawn(async move {
            loop {
                let deadline = *rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        match rx.has_changed() {
                            Ok(true) => continue,
                            Ok(false) => {
                                debug!(conversation_id = %id, "idle deadline reached");
                                let _ = expired_tx.send(id);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Push the deadline of an armed conversation out by a full period.
    /// Returns false if the conversation is not armed.
    pub fn touch(&self, conversation_id: &str) -> bool {
        match self.timers.get(conversation_id) {
            Some(tx) => {
                tx.send_replace(Instant::now() + self.timeout);
                true
            }
            None => false,
        }
    }

    /// Stop watching a conversation.
    pub fn disarm(&self, conversation_id: &str) {
        self.timers.remove(conversation_id);
    }

    pub fn is_armed(&self, conversation_id: &str) -> bool {
        self.timers.contains_key(conversation_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// The stream of expired conversation ids. Only the first caller gets it.
    pub fn take_expirations(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.expired_rx.lock().ok()?.take()
    }
}
