//! Device session: discovery, the connection lifecycle, and the request API
//! on top of one [`TransportChannel`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::accumulator::ResponseAccumulator;
use crate::backend::{BleCentral, BlePeripheral, WriteMode};
use crate::error::{FrameError, TransportError};
use crate::protocol::{
    decode_chunk, encode_command, BATTERY_LEVEL_QUERY, DEFAULT_MAX_COMMAND_LEN,
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_RESPONSE_TIMEOUT,
    DEFAULT_SCAN_TIMEOUT_SECS, FIRMWARE_VERSION_QUERY, FRAME_SERVICE_UUID, GIT_TAG_QUERY,
};
use crate::transport::{CharacteristicPair, TransportChannel};

// ── FrameSessionConfig ────────────────────────────────────────────────────────

/// Configuration for [`FrameSession`].
#[derive(Debug, Clone)]
pub struct FrameSessionConfig {
    /// Discovery + connect bound in seconds, for callers that do not pick
    /// their own. Default: `30`.
    pub scan_timeout_secs: u64,
    /// How long [`FrameSession::request_chunks`] waits for the *next* chunk
    /// before returning what it has. Default: 5 s.
    pub response_timeout: Duration,
    /// Spacing between RX reads on the poll path. Default: 500 ms.
    pub poll_interval: Duration,
    /// RX reads [`FrameSession::request_value`] makes before giving up.
    /// Default: `10`.
    pub poll_attempts: u32,
    /// Largest command accepted in one TX write. Default: `512`.
    pub max_command_len: usize,
    /// Only attach to a Frame whose advertised name starts with this.
    ///
    /// With `None` the first peripheral advertising the Frame service wins,
    /// with no ranking by signal strength. Set a prefix (e.g. `"Frame 4F"`)
    /// to pick a particular pair of glasses when several are in range.
    pub name_prefix: Option<String>,
    /// Log every command at `info` instead of `debug`. Default: `false`.
    pub echo: bool,
}

impl Default for FrameSessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            name_prefix: None,
            echo: false,
        }
    }
}

// ── SessionState ──────────────────────────────────────────────────────────────

/// Lifecycle of a [`FrameSession`].
///
/// `Disconnected → Discovering → Connecting → Ready`, and back to
/// `Disconnected` on timeout, teardown, or when the peer drops the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Discovering,
    Connecting,
    /// Both characteristics resolved and RX subscribed. The only state in
    /// which commands can be sent.
    Ready,
}

/// Per-connection state shared with the RX notification task.
struct Link<P> {
    state: SessionState,
    /// Bumped on every connect attempt and every teardown so a stale
    /// notification task cannot tear down a newer connection.
    generation: u64,
    name: Option<String>,
    peripheral: Option<P>,
    channel: Option<TransportChannel<P>>,
    pump: Option<JoinHandle<()>>,
}

fn lock<P>(link: &Mutex<Link<P>>) -> MutexGuard<'_, Link<P>> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

// ── FrameSession ──────────────────────────────────────────────────────────────

/// One host-side session with one pair of Frame glasses.
///
/// Owns discovery, the connection lifecycle, the TX/RX transport channel and
/// the single response accumulator. Every method takes `&self`, so a session
/// is usually shared behind an `Arc`; chunked requests are single-flight and a
/// request issued while another is outstanding is rejected with
/// [`FrameError::ProtocolViolation`].
pub struct FrameSession<C: BleCentral> {
    central: C,
    config: FrameSessionConfig,
    link: Arc<Mutex<Link<C::Peripheral>>>,
    accumulator: Arc<ResponseAccumulator>,
    in_flight: tokio::sync::Mutex<()>,
}

#[cfg(feature = "ble")]
impl FrameSession<crate::ble::BtleplugCentral> {
    /// A session on the first Bluetooth adapter of the system.
    pub async fn with_default_adapter(config: FrameSessionConfig) -> Result<Self, FrameError> {
        let central = crate::ble::BtleplugCentral::first_adapter().await?;
        Ok(Self::new(central, config))
    }
}

impl<C: BleCentral> FrameSession<C> {
    pub fn new(central: C, config: FrameSessionConfig) -> Self {
        Self {
            central,
            config,
            link: Arc::new(Mutex::new(Link {
                state: SessionState::Disconnected,
                generation: 0,
                name: None,
                peripheral: None,
                channel: None,
                pump: None,
            })),
            accumulator: Arc::new(ResponseAccumulator::new()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &FrameSessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        lock(&self.link).state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Advertised name of the attached Frame, while `Ready`.
    pub fn device_name(&self) -> Option<String> {
        lock(&self.link).name.clone()
    }

    /// `true` while `Ready` and the adapter still reports the link as up.
    pub async fn is_connected(&self) -> bool {
        let peripheral = {
            let link = lock(&self.link);
            if link.state != SessionState::Ready {
                return false;
            }
            link.peripheral.clone()
        };
        match peripheral {
            Some(p) => p.is_connected().await,
            None => false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Scan for the nearest Frame, connect, and resolve its characteristics,
    /// all within `timeout_secs`.
    ///
    /// Returns `Ok(false)` when nothing was found and attached in time, or
    /// when [`disconnect`](Self::disconnect) cancelled the attempt. A Frame
    /// that connects but lacks TX or RX fails with
    /// [`FrameError::CharacteristicMissing`]; the session stays
    /// `Disconnected` either way.
    pub async fn connect(&self, timeout_secs: u64) -> Result<bool, FrameError> {
        match self.try_connect(timeout_secs).await {
            Ok(_) => Ok(true),
            Err(FrameError::DiscoveryTimeout { secs }) => {
                info!("No Frame found within {secs} s");
                Ok(false)
            }
            Err(FrameError::Cancelled) => {
                info!("Connect cancelled by disconnect");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`connect`](Self::connect), but reports a timeout as
    /// [`FrameError::DiscoveryTimeout`] and returns the device name on success.
    pub async fn try_connect(&self, timeout_secs: u64) -> Result<String, FrameError> {
        let generation = {
            let mut link = lock(&self.link);
            match link.state {
                SessionState::Ready => return Ok(link.name.clone().unwrap_or_default()),
                SessionState::Discovering | SessionState::Connecting => {
                    return Err(FrameError::ProtocolViolation(
                        "a connect is already in progress on this session",
                    ))
                }
                SessionState::Disconnected => {}
            }
            link.state = SessionState::Discovering;
            link.generation += 1;
            link.generation
        };

        let result = self.discover_and_attach(timeout_secs, generation).await;
        // A cancelled attempt was already torn down, and a newer connect may
        // own the link by now.
        if result.is_err() && self.is_current(generation) {
            self.disconnect().await;
        }
        result
    }

    async fn discover_and_attach(
        &self,
        timeout_secs: u64,
        generation: u64,
    ) -> Result<String, FrameError> {
        let expired = || FrameError::DiscoveryTimeout { secs: timeout_secs };
        if timeout_secs == 0 {
            return Err(expired());
        }

        // Listen before scanning so nothing discovered in between is missed.
        let mut discoveries = self.central.discoveries(FRAME_SERVICE_UUID).await?;
        info!("Scanning for nearest Frame (timeout: {timeout_secs} s) …");
        self.central.start_scan(FRAME_SERVICE_UUID).await?;

        let tick = Duration::from_secs(1);
        let mut countdown = interval_at(Instant::now() + tick, tick);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut remaining = timeout_secs;
        let mut exhausted = false;

        let peripheral = loop {
            tokio::select! {
                found = discoveries.next(), if !exhausted => match found {
                    Some(_) if !self.is_current(generation) => return Err(FrameError::Cancelled),
                    Some(p) if self.accepts(&p) => break p,
                    Some(p) => debug!("Skipping {}: name does not match the configured prefix", p.id()),
                    None => {
                        debug!("Discovery stream closed; waiting out the countdown");
                        exhausted = true;
                    }
                },
                _ = countdown.tick() => {
                    if !self.is_current(generation) {
                        return Err(FrameError::Cancelled);
                    }
                    remaining -= 1;
                    debug!("Timeout: {remaining}");
                    if remaining == 0 {
                        return Err(expired());
                    }
                }
            }
        };

        let name = peripheral.name().unwrap_or_else(|| "Frame".into());
        {
            let mut link = lock(&self.link);
            if link.generation != generation {
                return Err(FrameError::Cancelled);
            }
            link.peripheral = Some(peripheral.clone());
            link.state = SessionState::Connecting;
        }
        // First match wins: no further candidates are considered.
        if let Err(e) = self.central.stop_scan().await {
            warn!("stop_scan failed: {e}");
        }
        info!("Connecting to nearest '{name}' {}", peripheral.id());

        let attach = self.attach(peripheral, name, generation);
        tokio::pin!(attach);
        loop {
            tokio::select! {
                result = &mut attach => return result,
                _ = countdown.tick() => {
                    if !self.is_current(generation) {
                        return Err(FrameError::Cancelled);
                    }
                    remaining -= 1;
                    debug!("Timeout: {remaining}");
                    if remaining == 0 {
                        warn!("Connect did not complete within {timeout_secs} s");
                        return Err(expired());
                    }
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.link).generation == generation
    }

    fn accepts(&self, peripheral: &C::Peripheral) -> bool {
        match &self.config.name_prefix {
            None => true,
            Some(prefix) => peripheral
                .name()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
        }
    }

    /// Connect `peripheral`, resolve TX/RX, subscribe RX, and only then
    /// become `Ready`.
    async fn attach(
        &self,
        peripheral: C::Peripheral,
        name: String,
        generation: u64,
    ) -> Result<String, FrameError> {
        peripheral.connect().await?;
        info!("Connected to '{name}' {}", peripheral.id());

        let discovered = peripheral.discover_characteristics().await?;
        let channel = TransportChannel::resolve(
            peripheral.clone(),
            CharacteristicPair::FRAME,
            &discovered,
            self.config.max_command_len,
            self.config.poll_interval,
        )?;

        let current = {
            let mut link = lock(&self.link);
            let current = link.generation == generation;
            if current {
                link.channel = Some(channel.clone());
            }
            current
        };
        if !current {
            // The teardown may have run before our connect completed.
            if let Err(e) = peripheral.disconnect().await {
                debug!("disconnect after cancelled connect: {e}");
            }
            return Err(FrameError::Cancelled);
        }

        let shared = Arc::clone(&self.link);
        let accumulator = Arc::clone(&self.accumulator);
        let pump = channel
            .subscribe(Arc::clone(&self.accumulator), move || {
                let mut link = lock(&shared);
                if link.generation != generation {
                    return;
                }
                info!("Frame disconnected by peer");
                link.generation += 1;
                link.state = SessionState::Disconnected;
                link.name = None;
                link.peripheral = None;
                link.channel = None;
                link.pump = None;
                // Keep what already arrived for the waiting request.
                accumulator.close();
            })
            .await?;

        let mut link = lock(&self.link);
        if link.generation != generation || link.channel.is_none() {
            pump.abort();
            return Err(FrameError::Cancelled);
        }
        link.pump = Some(pump);
        link.name = Some(name.clone());
        link.state = SessionState::Ready;
        info!("'{name}' ready");
        Ok(name)
    }

    /// Best-effort teardown: disconnect the peripheral if there is one, stop
    /// scanning, and drop the notification task. Safe to call in any state,
    /// any number of times.
    pub async fn disconnect(&self) {
        let (peripheral, pump) = {
            let mut link = lock(&self.link);
            link.generation += 1;
            link.state = SessionState::Disconnected;
            link.name = None;
            link.channel = None;
            (link.peripheral.take(), link.pump.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        self.accumulator.disarm();

        if let Some(p) = peripheral {
            match p.disconnect().await {
                Ok(()) => info!("Disconnected from {}", p.id()),
                Err(e) => warn!("Disconnect from {} failed: {e}", p.id()),
            }
        }
        if let Err(e) = self.central.stop_scan().await {
            debug!("stop_scan during disconnect: {e}");
        }
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    fn channel(&self) -> Result<TransportChannel<C::Peripheral>, FrameError> {
        let link = lock(&self.link);
        match (&link.state, &link.channel) {
            (SessionState::Ready, Some(channel)) => Ok(channel.clone()),
            _ => Err(TransportError::Unresolved.into()),
        }
    }

    fn begin_flight(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, FrameError> {
        self.in_flight.try_lock().map_err(|_| {
            warn!("protocol violation: request issued while another is outstanding");
            FrameError::ProtocolViolation("another request is still outstanding on this session")
        })
    }

    fn log_command(&self, command: &str) {
        if self.config.echo {
            info!("Sending Lua: {command}");
        } else {
            debug!("Sending Lua: {command}");
        }
    }

    /// Write `command` to TX without expecting anything back.
    ///
    /// Returns once the write is handed to the radio; says nothing about what
    /// the device did with it.
    pub async fn send(&self, command: &str) -> Result<(), FrameError> {
        let channel = self.channel()?;
        self.log_command(command);
        channel
            .write_command(&encode_command(command), WriteMode::WithoutResponse)
            .await?;
        Ok(())
    }

    /// Write `command` and collect the `expected` RX chunks it produces.
    ///
    /// Chunks come back in arrival order. If the device goes quiet for longer
    /// than [`FrameSessionConfig::response_timeout`] the chunks collected so
    /// far are returned: a short result may mean a timeout and is not an
    /// error.
    pub async fn request_chunks(
        &self,
        command: &str,
        expected: usize,
    ) -> Result<Vec<String>, FrameError> {
        let _flight = self.begin_flight()?;
        let channel = self.channel()?;

        let _expectation = self.accumulator.expect(expected);
        self.log_command(command);
        channel
            .write_command(&encode_command(command), WriteMode::WithResponse)
            .await?;

        let chunks = self.accumulator.chunks();
        tokio::pin!(chunks);
        let mut out = Vec::with_capacity(expected);
        while out.len() < expected {
            match tokio::time::timeout(self.config.response_timeout, chunks.next()).await {
                Ok(Some(chunk)) => out.push(decode_chunk(&chunk)),
                // Disarmed underneath us: the session was torn down.
                Ok(None) => break,
                Err(_) => break,
            }
        }
        if out.len() < expected {
            warn!(
                "Partial response to '{command}': {} of {expected} chunk(s)",
                out.len()
            );
        }
        Ok(out)
    }

    /// Write `command`, then poll RX until it holds a value or the attempt
    /// budget runs out (`Ok(None)`). For scalar queries that answer with a
    /// single `print`.
    pub async fn request_value(&self, command: &str) -> Result<Option<Vec<u8>>, FrameError> {
        let _flight = self.begin_flight()?;
        let channel = self.channel()?;

        self.log_command(command);
        channel
            .write_command(&encode_command(command), WriteMode::WithResponse)
            .await?;

        // Give the device one interval to run the statement.
        tokio::time::sleep(self.config.poll_interval).await;
        for attempt in 1..=self.config.poll_attempts {
            if let Some(value) = channel.poll_once().await? {
                debug!("Poll #{attempt}: {} byte(s)", value.len());
                return Ok(Some(value));
            }
        }
        warn!(
            "No value for '{command}' after {} poll(s)",
            self.config.poll_attempts
        );
        Ok(None)
    }

    async fn request_text(&self, command: &str) -> Result<Option<String>, FrameError> {
        Ok(self
            .request_value(command)
            .await?
            .map(|v| decode_chunk(&v).trim().to_owned()))
    }

    // ── Device commands ───────────────────────────────────────────────────────

    /// Battery level in percent.
    pub async fn battery_level(&self) -> Result<Option<f32>, FrameError> {
        let Some(text) = self.request_text(BATTERY_LEVEL_QUERY).await? else {
            return Ok(None);
        };
        match text.parse::<f32>() {
            Ok(level) => Ok(Some(level)),
            Err(e) => {
                warn!("Unparseable battery level {text:?}: {e}");
                Ok(None)
            }
        }
    }

    pub async fn firmware_version(&self) -> Result<Option<String>, FrameError> {
        self.request_text(FIRMWARE_VERSION_QUERY).await
    }

    /// Short git hash of the firmware build.
    pub async fn git_tag(&self) -> Result<Option<String>, FrameError> {
        self.request_text(GIT_TAG_QUERY).await
    }

    /// Put the device to sleep for `seconds`.
    pub async fn sleep(&self, seconds: f64) -> Result<(), FrameError> {
        self.send(&format!("frame.sleep({seconds})")).await
    }

    pub async fn stay_awake(&self, enable: bool) -> Result<(), FrameError> {
        self.send(&format!("frame.stay_awake({enable})")).await
    }

    /// Reboot the device into its firmware updater. Does not wait for the
    /// update itself.
    pub async fn update(&self) -> Result<(), FrameError> {
        self.send("frame.update()").await
    }
}
