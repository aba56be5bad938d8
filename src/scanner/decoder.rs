use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::torch::Torch;
use crate::error::DeviceError;

/// Source of decoded QR payloads bound to one camera.
#[async_trait]
pub trait QrDecoder: Send {
    /// Acquire the camera and begin decoding.
    async fn start(&mut self) -> Result<(), DeviceError>;

    /// Release the camera and the torch. Safe to call when not started.
    async fn stop(&mut self);

    fn is_active(&self) -> bool;

    /// Keep the camera but discard decoded payloads until `resume`.
    fn pause(&mut self);

    fn resume(&mut self);

    /// Next decoded payload; `None` once the camera stream has ended or the
    /// decoder is not started. Cancel-safe.
    async fn next_payload(&mut self) -> Option<String>;

    async fn set_torch(&mut self, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::TorchUnsupported)
    }
}

/// Exclusive lease on a camera device. Clones share the same lease.
#[derive(Debug, Clone)]
pub struct CameraSlot {
    permits: Arc<Semaphore>,
}

impl Default for CameraSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSlot {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// The camera is released when the returned permit is dropped.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, DeviceError> {
        self.permits.clone().try_acquire_owned().map_err(|_| {
            DeviceError::CameraUnavailable("camera is in use by another scan session".into())
        })
    }

    pub fn is_free(&self) -> bool {
        self.permits.available_permits() > 0
    }
}

/// Suppresses a payload repeated within `window` of its last sighting, so a
/// code held in front of the lens is reported once.
#[derive(Debug)]
pub struct Deduper {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Deduper {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn admit(&mut self, payload: &str, now: Instant) -> bool {
        let repeated = matches!(
            &self.last,
            Some((prev, seen)) if prev == payload && now.saturating_duration_since(*seen) < self.window
        );
        self.last = Some((payload.to_string(), now));
        !repeated
    }
}

/// One decoder output line to a payload. zbar prefixes the symbol type
/// unless run with `--raw`.
pub fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    let payload = line.strip_prefix("QR-Code:").unwrap_or(line).trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

/// Pause flag plus a counter bumped on every pause. A payload carries the
/// counter value from when it was read, so one that was already on its way
/// when the decoder paused is recognised after the next resume.
#[derive(Debug, Default)]
struct PauseGate {
    paused: AtomicBool,
    epoch: AtomicU64,
}

impl PauseGate {
    fn pause(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Tag for a payload read right now; `None` while paused.
    fn open_epoch(&self) -> Option<u64> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.paused.load(Ordering::SeqCst) {
            None
        } else {
            Some(epoch)
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.paused.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }
}

struct ActiveCapture {
    child: Child,
    reader: JoinHandle<()>,
    payloads: mpsc::Receiver<(u64, String)>,
    torch: Option<Torch>,
    _permit: OwnedSemaphorePermit,
}

/// Runs an external decoder (zbarcam by default) against a V4L2 device and
/// reads one payload per stdout line.
pub struct ProcessDecoder {
    command: Vec<String>,
    device: PathBuf,
    slot: CameraSlot,
    torch_led: Option<PathBuf>,
    dedupe_window: Duration,
    gate: Arc<PauseGate>,
    active: Option<ActiveCapture>,
}

impl std::fmt::Debug for ProcessDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDecoder")
            .field("command", &self.command)
            .field("device", &self.device)
            .field("active", &self.active.is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessDecoder {
    pub fn new(command: Vec<String>, device: impl Into<PathBuf>, slot: CameraSlot) -> Self {
        Self {
            command,
            device: device.into(),
            slot,
            torch_led: None,
            dedupe_window: Duration::from_millis(1500),
            gate: Arc::new(PauseGate::default()),
            active: None,
        }
    }

    pub fn with_torch(mut self, led_dir: Option<PathBuf>) -> Self {
        self.torch_led = led_dir;
        self
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }
}

async fn pump_lines<R>(
    output: R,
    tx: mpsc::Sender<(u64, String)>,
    gate: Arc<PauseGate>,
    window: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    let mut deduper = Deduper::new(window);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(epoch) = gate.open_epoch() else {
                    continue;
                };
                let Some(payload) = parse_line(&line) else {
                    continue;
                };
                if !deduper.admit(&payload, Instant::now()) {
                    continue;
                }
                if tx.send((epoch, payload)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "failed to read decoder output");
                break;
            }
        }
    }
    debug!("decoder output closed");
}

#[async_trait]
impl QrDecoder for ProcessDecoder {
    #[instrument(skip_all, fields(device = %self.device.display()))]
    async fn start(&mut self) -> Result<(), DeviceError> {
        if self.active.is_some() {
            return Ok(());
        }
        if !tokio::fs::try_exists(&self.device).await.unwrap_or(false) {
            return Err(DeviceError::CameraUnavailable(format!(
                "no camera at {}",
                self.device.display()
            )));
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| DeviceError::CameraUnavailable("no decoder command configured".into()))?;
        let permit = self.slot.try_acquire()?;

        let mut child = Command::new(program)
            .args(args)
            .arg(&self.device)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                DeviceError::CameraUnavailable(format!("failed to start {}: {}", program, err))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::CameraUnavailable("decoder has no stdout".into()))?;

        let torch = match &self.torch_led {
            Some(dir) => match Torch::open(dir).await {
                Ok(torch) => Some(torch),
                Err(err) => {
                    warn!(%err, led = %dir.display(), "torch not available");
                    None
                }
            },
            None => None,
        };

        self.gate.resume();
        let (tx, payloads) = mpsc::channel(16);
        let reader = tokio::spawn(pump_lines(stdout, tx, self.gate.clone(), self.dedupe_window));
        self.active = Some(ActiveCapture {
            child,
            reader,
            payloads,
            torch,
            _permit: permit,
        });
        info!(program = %program, "camera started");
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(mut capture) = self.active.take() else {
            return;
        };
        capture.reader.abort();
        if let Err(err) = capture.child.kill().await {
            debug!(%err, "decoder already exited");
        }
        if let Some(torch) = capture.torch.as_mut() {
            if torch.is_lit() {
                if let Err(err) = torch.set(false).await {
                    warn!(%err, "failed to switch torch off");
                }
            }
        }
        info!(device = %self.device.display(), "camera released");
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn pause(&mut self) {
        self.gate.pause();
        if let Some(capture) = self.active.as_mut() {
            while capture.payloads.try_recv().is_ok() {}
        }
    }

    fn resume(&mut self) {
        self.gate.resume();
    }

    async fn next_payload(&mut self) -> Option<String> {
        let capture = self.active.as_mut()?;
        loop {
            let (epoch, payload) = capture.payloads.recv().await?;
            if self.gate.is_current(epoch) {
                return Some(payload);
            }
            debug!(%payload, "discarding payload read before pause");
        }
    }

    async fn set_torch(&mut self, on: bool) -> Result<(), DeviceError> {
        let capture = self
            .active
            .as_mut()
            .ok_or_else(|| DeviceError::CameraUnavailable("camera is not started".into()))?;
        match capture.torch.as_mut() {
            Some(torch) => torch.set(on).await,
            None => Err(DeviceError::TorchUnsupported),
        }
    }
}

impl Drop for ProcessDecoder {
    fn drop(&mut self) {
        if let Some(capture) = &self.active {
            capture.reader.abort();
        }
    }
}

/// Decoder fed by an in-process channel, e.g. payloads piped on stdin.
/// Holds the camera slot like a real capture when one is given.
#[derive(Debug)]
pub struct ChannelDecoder {
    payloads: mpsc::Receiver<String>,
    slot: Option<CameraSlot>,
    permit: Option<OwnedSemaphorePermit>,
    active: bool,
    paused: bool,
}

impl ChannelDecoder {
    pub fn new(payloads: mpsc::Receiver<String>) -> Self {
        Self {
            payloads,
            slot: None,
            permit: None,
            active: false,
            paused: false,
        }
    }

    pub fn with_slot(mut self, slot: CameraSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

#[async_trait]
impl QrDecoder for ChannelDecoder {
    async fn start(&mut self) -> Result<(), DeviceError> {
        if self.active {
            return Ok(());
        }
        if let Some(slot) = &self.slot {
            self.permit = Some(slot.try_acquire()?);
        }
        self.active = true;
        self.paused = false;
        Ok(())
    }

    async fn stop(&mut self) {
        self.active = false;
        self.permit = None;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pause(&mut self) {
        self.paused = true;
        while self.payloads.try_recv().is_ok() {}
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    async fn next_payload(&mut self) -> Option<String> {
        if !self.active {
            return None;
        }
        loop {
            let line = self.payloads.recv().await?;
            if self.paused {
                debug!("decoder paused; discarding payload");
                continue;
            }
            if let Some(payload) = parse_line(&line) {
                return Some(payload);
            }
        }
    }
}
