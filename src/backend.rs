//! The Bluetooth stack as seen by the session.
//!
//! [`crate::session::FrameSession`] never talks to a platform API directly; it
//! is generic over a [`BleCentral`] that scans and hands out [`BlePeripheral`]
//! links. [`crate::ble`] implements both on top of btleplug, and tests swap in
//! an in-memory fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::{FrameError, TransportError};

/// How a write is acknowledged by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for the peer's ATT write response.
    WithResponse,
    /// Fire and forget at the ATT layer.
    WithoutResponse,
}

/// The host adapter: scanning and discovery.
#[async_trait]
pub trait BleCentral: Send + Sync + 'static {
    type Peripheral: BlePeripheral;

    /// Begin scanning for peripherals advertising `service`.
    async fn start_scan(&self, service: Uuid) -> Result<(), FrameError>;

    /// Stop scanning. Must succeed when no scan is running.
    async fn stop_scan(&self) -> Result<(), FrameError>;

    /// Peripherals advertising `service`, in the order they are discovered.
    async fn discoveries(
        &self,
        service: Uuid,
    ) -> Result<BoxStream<'static, Self::Peripheral>, FrameError>;
}

/// One discovered peripheral. Cloning yields another handle to the same link.
#[async_trait]
pub trait BlePeripheral: Clone + Send + Sync + 'static {
    /// Platform identifier (a MAC address on Linux, a UUID on macOS/Windows).
    fn id(&self) -> String;

    /// Advertised local name, if the advertisement carried one.
    fn name(&self) -> Option<String>;

    async fn connect(&self) -> Result<(), TransportError>;

    /// Run service discovery and return every characteristic UUID found.
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, TransportError>;

    async fn write(&self, uuid: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError>;

    /// Read the characteristic's current value.
    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Enable notifications and return the stream of their payloads. The
    /// stream ends when the link drops.
    async fn subscribe(&self, uuid: Uuid) -> Result<BoxStream<'static, Vec<u8>>, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;
}
