//! # frame-rs
//!
//! Async Rust host client for [Brilliant Labs Frame](https://brilliant.xyz/)
//! glasses over Bluetooth Low Energy.
//!
//! Frame exposes two characteristics: TX, which takes Lua statements, and RX,
//! which notifies whatever those statements `print`. This crate owns the hard
//! part of talking to it: finding and attaching to the glasses under a
//! bounded timeout, keeping at most one request in flight, and turning the
//! unordered-arrival RX notification stream back into the exact number of
//! response chunks a command is known to produce.
//!
//! ## Quick start
//!
//! ```no_run
//! use frame_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = FrameSession::with_default_adapter(FrameSessionConfig::default()).await?;
//!     if !session.connect(10).await? {
//!         anyhow::bail!("no Frame in range");
//!     }
//!
//!     session.send("frame.display.text('hello', 50, 100) frame.display.show()").await?;
//!     let lines = session.request_chunks("print(1) print(2)", 2).await?;
//!     println!("{lines:?}");
//!     println!("battery: {:?}", session.battery_level().await?);
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Using as a library dependency
//!
//! ```toml
//! [dependencies]
//! # btleplug backend included:
//! frame-rs = "0.1"
//!
//! # btleplug backend without the REPL binary:
//! frame-rs = { version = "0.1", default-features = false, features = ["ble"] }
//!
//! # Session core only; bring your own BleCentral:
//! frame-rs = { version = "0.1", default-features = false }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`session`] | Discovery, connect/disconnect, and the single-flight request API |
//! | [`accumulator`] | Buffer turning RX notifications into a counted pull sequence |
//! | [`transport`] | The TX/RX characteristic pair of one connection |
//! | [`backend`] | Traits the session uses to reach the Bluetooth stack |
//! | `ble` | btleplug implementation of [`backend`] (feature `ble`) |
//! | [`protocol`] | GATT UUIDs, timing defaults, and wire helpers |
//! | [`signal`] | Disconnect-and-exit on termination signals |
//! | [`error`] | Error types |

pub mod accumulator;
pub mod backend;
#[cfg(feature = "ble")]
pub mod ble;
pub mod error;
pub mod protocol;
pub mod session;
pub mod signal;
pub mod transport;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::session::{FrameSession, FrameSessionConfig, SessionState};

    // ── Backend ───────────────────────────────────────────────────────────────
    pub use crate::backend::{BleCentral, BlePeripheral, WriteMode};
    #[cfg(feature = "ble")]
    pub use crate::ble::{BtleplugCentral, BtleplugPeripheral};

    // ── Errors ────────────────────────────────────────────────────────────────
    pub use crate::error::{FrameError, TransportError};

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{FRAME_SERVICE_UUID, RX_CHARACTERISTIC, TX_CHARACTERISTIC};
}
