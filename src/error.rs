//! Error types for the Frame session and its transport.

use thiserror::Error;
use uuid::Uuid;

/// A failure at the BLE link level: the characteristic pair is not there, or
/// the radio refused a write, read, or subscription.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No characteristic pair is resolved, so there is nothing to write to.
    #[error("TX characteristic is not resolved; the session is not ready")]
    Unresolved,
    #[error("write to {uuid} failed: {reason}")]
    Write { uuid: Uuid, reason: String },
    #[error("read from {uuid} failed: {reason}")]
    Read { uuid: Uuid, reason: String },
    #[error("subscribe to {uuid} failed: {reason}")]
    Subscribe { uuid: Uuid, reason: String },
    /// Connect, service discovery or disconnect failed on the peripheral.
    #[error("link error: {0}")]
    Link(String),
    #[error("command is {len} bytes; a single write accepts at most {max}")]
    CommandTooLong { len: usize, max: usize },
}

/// Everything a [`crate::session::FrameSession`] can fail with.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Nothing advertising the Frame service was found and attached in time.
    ///
    /// [`crate::session::FrameSession::connect`] folds this into `Ok(false)`.
    #[error("no Frame found and attached within {secs} s")]
    DiscoveryTimeout { secs: u64 },
    /// The peripheral connected but does not expose one of the two channels.
    #[error("{role} characteristic {uuid} not found")]
    CharacteristicMissing { role: &'static str, uuid: Uuid },
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A request was issued while another one still owns the accumulator, or
    /// the notification stream was subscribed twice on one connection.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// [`crate::session::FrameSession::disconnect`] ran while a connect was
    /// still discovering or attaching.
    ///
    /// [`crate::session::FrameSession::connect`] folds this into `Ok(false)`.
    #[error("connect cancelled by disconnect")]
    Cancelled,
    /// The Bluetooth adapter itself failed. Not recoverable by the session.
    #[error("Bluetooth adapter failure: {0}")]
    Adapter(String),
}
