//! In-memory Bluetooth backend for driving `FrameSession` without a radio.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use frame_rs::backend::{BleCentral, BlePeripheral, WriteMode};
use frame_rs::error::{FrameError, TransportError};
use frame_rs::protocol::{RX_CHARACTERISTIC, TX_CHARACTERISTIC};
use frame_rs::session::{FrameSession, FrameSessionConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ── FakePeripheral ────────────────────────────────────────────────────────────

struct PeripheralInner {
    id: String,
    name: Option<String>,
    characteristics: Vec<Uuid>,
    connect_delay: Duration,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    writes: Mutex<Vec<(Uuid, Vec<u8>, WriteMode)>>,
    /// One entry per write-with-response: the chunks RX notifies back.
    replies: Mutex<VecDeque<Vec<&'static str>>>,
    /// Successive values returned by RX reads; empty once drained.
    reads: Mutex<VecDeque<Vec<u8>>>,
    read_count: AtomicUsize,
    notifier: Mutex<Option<UnboundedSender<Vec<u8>>>>,
}

#[derive(Clone)]
pub struct FakePeripheral {
    inner: Arc<PeripheralInner>,
}

impl FakePeripheral {
    /// A Frame exposing both TX and RX.
    pub fn frame(name: &str) -> Self {
        Self::with_characteristics(name, vec![TX_CHARACTERISTIC, RX_CHARACTERISTIC])
    }

    pub fn with_characteristics(name: &str, characteristics: Vec<Uuid>) -> Self {
        Self::build(name, characteristics, Duration::ZERO)
    }

    pub fn slow_to_connect(name: &str, delay: Duration) -> Self {
        Self::build(name, vec![TX_CHARACTERISTIC, RX_CHARACTERISTIC], delay)
    }

    fn build(name: &str, characteristics: Vec<Uuid>, connect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(PeripheralInner {
                id: format!("fake-{name}"),
                name: Some(name.to_owned()),
                characteristics,
                connect_delay,
                connected: AtomicBool::new(false),
                disconnects: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
                reads: Mutex::new(VecDeque::new()),
                read_count: AtomicUsize::new(0),
                notifier: Mutex::new(None),
            }),
        }
    }

    /// Queue the chunks the next write-with-response is answered with.
    pub fn reply_with(&self, chunks: Vec<&'static str>) {
        self.inner.replies.lock().unwrap().push_back(chunks);
    }

    pub fn queue_reads(&self, values: &[&[u8]]) {
        let mut reads = self.inner.reads.lock().unwrap();
        reads.extend(values.iter().map(|v| v.to_vec()));
    }

    /// Push a notification on RX as if the device printed something.
    pub fn notify(&self, chunk: &[u8]) {
        if let Some(tx) = self.inner.notifier.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(chunk.to_vec());
        }
    }

    /// The peer goes away: the notification stream ends.
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.notifier.lock().unwrap().take();
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteMode)> {
        self.inner.writes.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.inner.read_count.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    fn id(&self) -> String {
        self.inner.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.inner.name.clone()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        tokio::time::sleep(self.inner.connect_delay).await;
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, TransportError> {
        Ok(self.inner.characteristics.clone())
    }

    async fn write(&self, uuid: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        if !self.connected() {
            return Err(TransportError::Write {
                uuid,
                reason: "not connected".into(),
            });
        }
        self.inner
            .writes
            .lock()
            .unwrap()
            .push((uuid, data.to_vec(), mode));
        if mode == WriteMode::WithResponse {
            let reply = self.inner.replies.lock().unwrap().pop_front();
            for chunk in reply.unwrap_or_default() {
                self.notify(chunk.as_bytes());
            }
        }
        Ok(())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        if !self.connected() {
            return Err(TransportError::Read {
                uuid,
                reason: "not connected".into(),
            });
        }
        self.inner.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.reads.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn subscribe(&self, _uuid: Uuid) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        let (tx, rx) = unbounded();
        *self.inner.notifier.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_link();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected()
    }
}

// ── FakeCentral ───────────────────────────────────────────────────────────────

struct CentralInner {
    /// Each candidate shows up after its delay, in order.
    candidates: Vec<(Duration, FakePeripheral)>,
    scanning: AtomicBool,
    scans_started: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeCentral {
    inner: Arc<CentralInner>,
}

impl FakeCentral {
    pub fn empty() -> Self {
        Self::with_candidates(Vec::new())
    }

    pub fn with(peripheral: FakePeripheral) -> Self {
        Self::with_candidates(vec![(Duration::from_millis(100), peripheral)])
    }

    pub fn with_candidates(candidates: Vec<(Duration, FakePeripheral)>) -> Self {
        Self {
            inner: Arc::new(CentralInner {
                candidates,
                scanning: AtomicBool::new(false),
                scans_started: AtomicUsize::new(0),
            }),
        }
    }

    pub fn scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    pub fn scans_started(&self) -> usize {
        self.inner.scans_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    type Peripheral = FakePeripheral;

    async fn start_scan(&self, _service: Uuid) -> Result<(), FrameError> {
        self.inner.scanning.store(true, Ordering::SeqCst);
        self.inner.scans_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), FrameError> {
        self.inner.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn discoveries(
        &self,
        _service: Uuid,
    ) -> Result<BoxStream<'static, FakePeripheral>, FrameError> {
        if self.inner.candidates.is_empty() {
            return Ok(stream::pending::<FakePeripheral>().boxed());
        }
        let candidates = self.inner.candidates.clone();
        Ok(stream::iter(candidates)
            .then(|(delay, p)| async move {
                tokio::time::sleep(delay).await;
                p
            })
            .boxed())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub fn test_config() -> FrameSessionConfig {
    FrameSessionConfig {
        response_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(500),
        poll_attempts: 5,
        ..FrameSessionConfig::default()
    }
}

/// A session already `Ready` on `peripheral`.
pub async fn connected_session(
    peripheral: FakePeripheral,
    config: FrameSessionConfig,
) -> FrameSession<FakeCentral> {
    init_logging();
    let session = FrameSession::new(FakeCentral::with(peripheral), config);
    assert!(session.connect(5).await.expect("connect"));
    session
}
