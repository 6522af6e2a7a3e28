//! Camera texture provider.
//!
//! `CameraTextureProvider` owns the camera lifecycle for one reflective scene:
//!
//! ```text
//! Idle --acquire--> Requesting --granted--> Active --release--> Released
//!                        |                    |
//!                        +--denied--> Denied  +--stream lost--> Unavailable
//!                        +--no device / start failed--> Unavailable
//! ```
//!
//! Negotiation (permission prompt plus stream start) runs on a worker thread
//! so the render loop never blocks. The worker reports back over a channel;
//! results are applied on the render thread in `update()` or `settle()`.
//! After a grant the same worker keeps pumping frames into the shared
//! `ImageSource` until it is cancelled, and its `DeviceLease` stops the
//! camera when it exits.
//!
//! Every acquisition carries a generation number. `release()` bumps the
//! generation and cancels the worker without waiting for it, so a negotiation
//! that resolves after release is discarded and its device stopped. Cancelled
//! workers are retired, not joined: the next acquisition's worker joins them
//! before it opens the device, so one provider never has two negotiations
//! competing for the same camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::{AcquireError, CaptureConstraints, CapturedFrame, DeviceLease, MediaDevices};
use crate::frame::ImageSource;
use crate::texture::ReflectionTexture;

/// Observable camera state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraStatus {
    /// Nothing requested yet.
    Idle,
    /// Waiting for the permission prompt and stream start.
    Requesting,
    /// A live frame source is bound and the texture is published.
    Active,
    /// The user refused camera access.
    Denied,
    /// No device, no capture capability, or the stream failed.
    Unavailable,
    /// Torn down by `release()`.
    Released,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Idle => "idle",
            CameraStatus::Requesting => "requesting",
            CameraStatus::Active => "active",
            CameraStatus::Denied => "denied",
            CameraStatus::Unavailable => "unavailable",
            CameraStatus::Released => "released",
        }
    }

    /// Failure states that stay put until the caller retries.
    pub fn is_failure(&self) -> bool {
        matches!(self, CameraStatus::Denied | CameraStatus::Unavailable)
    }

    fn for_error(error: &AcquireError) -> Self {
        match error {
            AcquireError::PermissionDenied(_) => CameraStatus::Denied,
            AcquireError::DeviceUnavailable(_) | AcquireError::StreamStartFailed(_) => {
                CameraStatus::Unavailable
            }
        }
    }
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for logs and the preview summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub acquisitions: u64,
    pub activations: u64,
    pub failures: u64,
    pub discarded_negotiations: u64,
    /// Render-loop refreshes that found new pixel contents.
    pub frames_presented: u64,
}

enum WorkerEvent {
    Granted { generation: u64, image: ImageSource },
    Failed { generation: u64, error: AcquireError },
    /// A granted stream stopped delivering frames.
    Lost { generation: u64, error: String },
}

struct Session {
    generation: u64,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owns camera acquisition and the derived reflection texture.
pub struct CameraTextureProvider {
    devices: Arc<dyn MediaDevices>,
    constraints: CaptureConstraints,
    status: CameraStatus,
    texture: Option<ReflectionTexture>,
    last_error: Option<AcquireError>,
    session: Option<Session>,
    /// Cancelled workers that may still hold the device.
    retired: Vec<JoinHandle<()>>,
    generation: u64,
    revision: u64,
    presented_version: u64,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    stats: ProviderStats,
}

impl CameraTextureProvider {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: CaptureConstraints) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            devices,
            constraints,
            status: CameraStatus::Idle,
            texture: None,
            last_error: None,
            session: None,
            retired: Vec::new(),
            generation: 0,
            revision: 0,
            presented_version: 0,
            events_tx,
            events_rx,
            stats: ProviderStats::default(),
        }
    }

    pub fn status(&self) -> CameraStatus {
        self.status
    }

    /// The published texture; `Some` exactly when the status is `Active`.
    pub fn texture(&self) -> Option<&ReflectionTexture> {
        self.texture.as_ref()
    }

    /// The live frame buffer behind the texture.
    pub fn image_source(&self) -> Option<&ImageSource> {
        self.texture.as_ref().map(ReflectionTexture::source)
    }

    /// Why the last acquisition failed, if it did.
    pub fn last_error(&self) -> Option<&AcquireError> {
        self.last_error.as_ref()
    }

    /// Increases on every status or texture change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats.clone()
    }

    /// Start negotiating camera access.
    ///
    /// Does nothing while a request is in flight or a stream is active.
    /// From any other state this is an explicit (re)try.
    pub fn acquire(&mut self) {
        if matches!(self.status, CameraStatus::Requesting | CameraStatus::Active) {
            log::debug!(
                "CameraTextureProvider: acquire ignored while {}",
                self.status
            );
            return;
        }

        self.generation += 1;
        self.stats.acquisitions += 1;
        self.last_error = None;

        self.retired.retain(|join| !join.is_finished());
        if !self.retired.is_empty() {
            log::debug!(
                "CameraTextureProvider: acquisition {} waits for {} retired worker(s)",
                self.generation,
                self.retired.len()
            );
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker {
            generation: self.generation,
            predecessors: std::mem::take(&mut self.retired),
            devices: Arc::clone(&self.devices),
            constraints: self.constraints.clone(),
            cancel: Arc::clone(&cancel),
            events: self.events_tx.clone(),
        };
        log::info!(
            "CameraTextureProvider: requesting {} at {}x{}",
            self.devices.describe(),
            self.constraints.width,
            self.constraints.height
        );
        let spawned = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || worker.run());
        match spawned {
            Ok(join) => {
                self.session = Some(Session {
                    generation: self.generation,
                    cancel,
                    join,
                });
                self.set_status(CameraStatus::Requesting);
            }
            Err(err) => {
                self.fail(AcquireError::DeviceUnavailable(format!(
                    "could not start capture worker: {}",
                    err
                )));
            }
        }
    }

    /// Stop the camera and dispose the texture.
    ///
    /// Never blocks: the worker is cancelled and stops the device itself
    /// once its current frame wait or permission prompt returns. A pending
    /// negotiation is discarded whatever it resolves to. Safe to call any
    /// number of times.
    pub fn release(&mut self) {
        let was_live = matches!(self.status, CameraStatus::Active | CameraStatus::Requesting);
        // Results still in flight belong to an older generation from here on.
        self.generation += 1;

        if let Some(texture) = self.texture.take() {
            if texture.dispose() {
                log::debug!("CameraTextureProvider: disposed {}", texture.id());
            }
        }

        if let Some(session) = self.session.take() {
            log::debug!(
                "CameraTextureProvider: cancelling capture worker {}",
                session.generation
            );
            self.retire(session);
        }

        if was_live {
            log::info!("CameraTextureProvider: released camera");
            self.set_status(CameraStatus::Released);
        }
    }

    /// Release, then acquire again. Publishes a new texture handle on success.
    pub fn restart(&mut self) {
        self.release();
        self.acquire();
    }

    /// Per display refresh: apply resolved negotiations and note new frames.
    ///
    /// Returns true when the status or texture handle changed.
    pub fn update(&mut self) -> bool {
        let before = self.revision;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
        if let Some(texture) = &self.texture {
            let version = texture.version();
            if version != self.presented_version {
                self.presented_version = version;
                self.stats.frames_presented += 1;
            }
        }
        self.revision != before
    }

    /// Block until a pending negotiation resolves or `timeout` passes.
    ///
    /// Returns the status afterwards. Meant for headless runs and tests; an
    /// interactive render loop calls `update()` instead.
    pub fn settle(&mut self, timeout: Duration) -> CameraStatus {
        let deadline = Instant::now() + timeout;
        self.update();
        while self.status == CameraStatus::Requesting {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.status
    }

    fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Granted { generation, image } => {
                if generation != self.generation || self.status != CameraStatus::Requesting {
                    self.stats.discarded_negotiations += 1;
                    log::debug!(
                        "CameraTextureProvider: discarding stale grant (generation {})",
                        generation
                    );
                    return;
                }
                let texture = ReflectionTexture::new(image);
                let (width, height) = texture.dimensions();
                log::info!(
                    "CameraTextureProvider: camera active ({}x{}, {})",
                    width,
                    height,
                    texture.id()
                );
                self.presented_version = texture.version();
                self.texture = Some(texture);
                self.stats.activations += 1;
                self.set_status(CameraStatus::Active);
            }
            WorkerEvent::Failed { generation, error } => {
                if generation != self.generation {
                    self.stats.discarded_negotiations += 1;
                    return;
                }
                self.fail(error);
            }
            WorkerEvent::Lost { generation, error } => {
                if generation != self.generation || self.status != CameraStatus::Active {
                    return;
                }
                log::warn!("CameraTextureProvider: camera stream lost: {}", error);
                if let Some(texture) = self.texture.take() {
                    texture.dispose();
                }
                if let Some(session) = self.session.take() {
                    self.retire(session);
                }
                self.last_error = Some(AcquireError::DeviceUnavailable(error));
                self.stats.failures += 1;
                self.set_status(CameraStatus::Unavailable);
            }
        }
    }

    fn fail(&mut self, error: AcquireError) {
        let status = CameraStatus::for_error(&error);
        log::warn!("CameraTextureProvider: {} ({})", error, status);
        if let Some(session) = self.session.take() {
            // The worker returns right after reporting the failure.
            self.retire(session);
        }
        self.last_error = Some(error);
        self.stats.failures += 1;
        self.set_status(status);
    }

    fn retire(&mut self, session: Session) {
        session.cancel.store(true, Ordering::Release);
        self.retired.retain(|join| !join.is_finished());
        self.retired.push(session.join);
    }

    fn set_status(&mut self, status: CameraStatus) {
        if self.status != status {
            log::debug!("CameraTextureProvider: {} -> {}", self.status, status);
        }
        self.status = status;
        self.revision += 1;
    }
}

impl Drop for CameraTextureProvider {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs one acquisition: negotiate, report, then pump frames until cancelled.
struct CaptureWorker {
    generation: u64,
    /// Retired workers of the same provider; joined before the device is opened.
    predecessors: Vec<JoinHandle<()>>,
    devices: Arc<dyn MediaDevices>,
    constraints: CaptureConstraints,
    cancel: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
}

impl CaptureWorker {
    fn run(mut self) {
        for predecessor in std::mem::take(&mut self.predecessors) {
            if predecessor.join().is_err() {
                log::warn!("CameraTextureProvider: retired capture worker panicked");
            }
        }
        if self.cancelled() {
            return;
        }

        let (mut lease, first) = match negotiate(self.devices.as_ref(), &self.constraints) {
            Ok(granted) => granted,
            Err(error) => {
                let _ = self.events.send(WorkerEvent::Failed {
                    generation: self.generation,
                    error,
                });
                return;
            }
        };

        if self.cancelled() {
            log::debug!(
                "CameraTextureProvider: negotiation {} resolved after release; stopping device",
                self.generation
            );
            return;
        }

        let image = ImageSource::new(first);
        let granted = WorkerEvent::Granted {
            generation: self.generation,
            image: image.clone(),
        };
        if self.events.send(granted).is_err() {
            return;
        }

        while !self.cancelled() {
            match lease.next_frame() {
                Ok(frame) => image.write(frame),
                Err(err) => {
                    if !self.cancelled() {
                        let _ = self.events.send(WorkerEvent::Lost {
                            generation: self.generation,
                            error: format!("{:#}", err),
                        });
                    }
                    break;
                }
            }
        }
        lease.stop();
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Open and start the device, and wait for its first frame.
fn negotiate(
    devices: &dyn MediaDevices,
    constraints: &CaptureConstraints,
) -> Result<(DeviceLease, CapturedFrame), AcquireError> {
    let mut lease = DeviceLease::new(devices.open(constraints)?);
    lease.start()?;
    let first = lease
        .next_frame()
        .map_err(|err| AcquireError::StreamStartFailed(format!("{:#}", err)))?;
    Ok((lease, first))
}
