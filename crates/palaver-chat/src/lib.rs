// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat core for the Palaver relay.
//!
//! - [`PresenceRegistry`] tracks who is connected and through which handle
//! - [`LifecycleManager`] moves conversations through `waiting -> active -> ended`
//! - [`IdleWatchdog`] ends conversations nobody has written to for a while
//! - [`MessageRelay`] persists and delivers messages in order
//! - [`ChatService`] is the facade the gateway drives

pub mod lifecycle;
pub mod presence;
pub mod relay;
pub mod service;
pub mod shutdown;
pub mod watchdog;

pub use lifecycle::{LifecycleManager, RecoveryReport};
pub use presence::PresenceRegistry;
pub use relay::{MessageRelay, SendOutcome};
pub use service::ChatService;
pub use watchdog::IdleWatchdog;
