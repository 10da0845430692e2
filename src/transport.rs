//! The TX/RX characteristic pair of one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::accumulator::ResponseAccumulator;
use crate::backend::{BlePeripheral, WriteMode};
use crate::error::{FrameError, TransportError};
use crate::protocol::{RX_CHARACTERISTIC, TX_CHARACTERISTIC};

/// The two characteristics a session needs. Both must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicPair {
    pub tx: Uuid,
    pub rx: Uuid,
}

impl CharacteristicPair {
    /// The pair every Frame exposes.
    pub const FRAME: Self = Self {
        tx: TX_CHARACTERISTIC,
        rx: RX_CHARACTERISTIC,
    };

    /// Check that both halves are among the `discovered` characteristics.
    pub fn resolve(self, discovered: &[Uuid]) -> Result<Self, FrameError> {
        for (role, uuid) in [("TX", self.tx), ("RX", self.rx)] {
            if !discovered.contains(&uuid) {
                return Err(FrameError::CharacteristicMissing { role, uuid });
            }
        }
        Ok(self)
    }
}

/// Raw send, raw poll-read and the one notification subscription of a
/// connected peripheral.
///
/// Only constructed once both characteristics are resolved. Clones share the
/// subscription flag and the poll rate limiter.
#[derive(Clone)]
pub struct TransportChannel<P> {
    peripheral: P,
    pair: CharacteristicPair,
    max_command_len: usize,
    poll_interval: Duration,
    last_poll: Arc<Mutex<Option<Instant>>>,
    subscribed: Arc<AtomicBool>,
}

impl<P: BlePeripheral> TransportChannel<P> {
    /// Bind `pair` on `peripheral`, failing with
    /// [`FrameError::CharacteristicMissing`] if either half was not discovered.
    pub fn resolve(
        peripheral: P,
        pair: CharacteristicPair,
        discovered: &[Uuid],
        max_command_len: usize,
        poll_interval: Duration,
    ) -> Result<Self, FrameError> {
        let pair = pair.resolve(discovered)?;
        info!("{}: TX {} and RX {} resolved", peripheral.id(), pair.tx, pair.rx);
        Ok(Self {
            peripheral,
            pair,
            max_command_len,
            poll_interval,
            last_poll: Arc::new(Mutex::new(None)),
            subscribed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Send one whole command in a single TX write.
    pub async fn write_command(&self, payload: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        if payload.len() > self.max_command_len {
            return Err(TransportError::CommandTooLong {
                len: payload.len(),
                max: self.max_command_len,
            });
        }
        self.peripheral.write(self.pair.tx, payload, mode).await
    }

    /// Read RX directly, outside the notification path.
    ///
    /// Consecutive reads are spaced at least one poll interval apart; a call
    /// that comes early sleeps out the remainder. An empty value means the
    /// device has nothing to say yet and comes back as `None`.
    pub async fn poll_once(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let last = *self.last_poll.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = last {
            tokio::time::sleep_until(last + self.poll_interval).await;
        }
        let value = self.peripheral.read(self.pair.rx).await;
        *self.last_poll.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        let value = value?;
        Ok((!value.is_empty()).then_some(value))
    }

    /// Enable RX notifications and forward every chunk, verbatim and in
    /// arrival order, to `accumulator`.
    ///
    /// The forwarding task lives until the notification stream ends, then runs
    /// `on_closed`. Subscribing twice on one connection is rejected.
    pub async fn subscribe<F>(
        &self,
        accumulator: Arc<ResponseAccumulator>,
        on_closed: F,
    ) -> Result<JoinHandle<()>, FrameError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(FrameError::ProtocolViolation(
                "RX notifications are already subscribed on this connection",
            ));
        }
        let mut notifications = match self.peripheral.subscribe(self.pair.rx).await {
            Ok(n) => n,
            Err(e) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let id = self.peripheral.id();
        info!("{id}: RX notification stream subscribed");

        Ok(tokio::spawn(async move {
            let mut count: u64 = 0;
            while let Some(chunk) = notifications.next().await {
                count += 1;
                debug!("RX chunk #{count}: {} bytes", chunk.len());
                accumulator.push(chunk);
            }
            info!("{id}: RX notification stream ended after {count} chunk(s)");
            on_closed();
        }))
    }
}
