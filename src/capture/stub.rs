//! Synthetic camera devices.
//!
//! `stub://` devices behave like a real capture facility without hardware:
//! - `stub://user` grants a stream of generated frames from a user-facing camera
//! - `stub://environment` does the same from an environment-facing camera
//! - any other name grants a camera that satisfies either facing
//! - `stub://denied` refuses permission
//! - `stub://none` reports that no camera exists
//! - `stub://start-fails` grants access but never produces a frame
//!
//! An optional `?fps=N` query sets the frame cadence (default 30).
//!
//! A gated device (`StubDevices::gated`) holds every negotiation open until
//! the test resolves it through its `StubGate`, which is how pending
//! permission prompts are simulated.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AcquireError, CaptureConstraints, CapturedFrame, Facing, FrameStream, MediaDevices};

const DEFAULT_STUB_FPS: u32 = 30;

/// How a synthetic negotiation resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubOutcome {
    Grant,
    Deny,
    NoDevice,
    StartFails,
}

#[derive(Default)]
struct StubCounters {
    opens: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    frames: AtomicU64,
    in_use: AtomicBool,
}

/// Synthetic capture facility.
pub struct StubDevices {
    uri: String,
    outcome: StubOutcome,
    facing: Option<Facing>,
    fps: u32,
    gate: Option<Mutex<Receiver<StubOutcome>>>,
    counters: Arc<StubCounters>,
}

/// Resolves pending negotiations on a gated `StubDevices`.
#[derive(Clone)]
pub struct StubGate {
    tx: Sender<StubOutcome>,
}

impl StubGate {
    /// Resolve the oldest pending (or next) negotiation.
    ///
    /// Returns false when the device side is gone.
    pub fn resolve(&self, outcome: StubOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

impl StubDevices {
    pub fn new(outcome: StubOutcome) -> Self {
        Self {
            uri: "stub://user".to_string(),
            outcome,
            facing: None,
            fps: DEFAULT_STUB_FPS,
            gate: None,
            counters: Arc::new(StubCounters::default()),
        }
    }

    /// A device whose negotiations stay pending until resolved via the gate.
    pub fn gated() -> (Self, StubGate) {
        let (tx, rx) = mpsc::channel();
        let mut devices = Self::new(StubOutcome::Grant);
        devices.uri = "stub://gated".to_string();
        devices.gate = Some(Mutex::new(rx));
        (devices, StubGate { tx })
    }

    pub fn from_uri(uri: &str) -> anyhow::Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow::anyhow!("not a stub device: {}", uri))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        let outcome = match name {
            "denied" => StubOutcome::Deny,
            "none" => StubOutcome::NoDevice,
            "start-fails" => StubOutcome::StartFails,
            _ => StubOutcome::Grant,
        };
        let mut devices = Self::new(outcome);
        devices.uri = uri.to_string();
        devices.facing = name.parse::<Facing>().ok();
        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                match pair.split_once('=') {
                    Some(("fps", value)) => {
                        let fps: u32 = value
                            .parse()
                            .map_err(|_| anyhow::anyhow!("invalid fps in {}", uri))?;
                        devices = devices.with_fps(fps);
                    }
                    _ => return Err(anyhow::anyhow!("unknown stub option '{}' in {}", pair, uri)),
                }
            }
        }
        Ok(devices)
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn opens(&self) -> u64 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u64 {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.counters.stops.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.counters.frames.load(Ordering::SeqCst)
    }

    /// Whether some stream currently holds the device.
    pub fn in_use(&self) -> bool {
        self.counters.in_use.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<StubOutcome, AcquireError> {
        let Some(gate) = &self.gate else {
            return Ok(self.outcome);
        };
        let rx = gate
            .lock()
            .map_err(|_| AcquireError::DeviceUnavailable("stub gate poisoned".to_string()))?;
        rx.recv().map_err(|_| {
            AcquireError::DeviceUnavailable("negotiation abandoned".to_string())
        })
    }
}

impl MediaDevices for StubDevices {
    fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameStream>, AcquireError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome()?;
        match outcome {
            StubOutcome::Deny => {
                return Err(AcquireError::PermissionDenied(
                    "user dismissed the camera prompt".to_string(),
                ))
            }
            StubOutcome::NoDevice => {
                return Err(AcquireError::DeviceUnavailable(format!(
                    "no camera at {}",
                    self.uri
                )))
            }
            StubOutcome::Grant | StubOutcome::StartFails => {}
        }

        if let Some(facing) = self.facing {
            if facing != constraints.facing {
                return Err(AcquireError::DeviceUnavailable(format!(
                    "no {}-facing camera at {}",
                    constraints.facing.as_str(),
                    self.uri
                )));
            }
        }

        if self
            .counters
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AcquireError::DeviceUnavailable(format!(
                "{} is busy",
                self.uri
            )));
        }

        log::debug!(
            "StubDevices: granted {} at {}x{} ({}-facing)",
            self.uri,
            constraints.width,
            constraints.height,
            constraints.facing.as_str()
        );
        Ok(Box::new(StubStream {
            counters: Arc::clone(&self.counters),
            width: constraints.width,
            height: constraints.height,
            interval: Duration::from_secs_f64(1.0 / self.fps as f64),
            fail_start: outcome == StubOutcome::StartFails,
            started: false,
            claimed: true,
            frame_count: 0,
            scene_state: 0,
        }))
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

struct StubStream {
    counters: Arc<StubCounters>,
    width: u32,
    height: u32,
    interval: Duration,
    fail_start: bool,
    started: bool,
    claimed: bool,
    frame_count: u64,
    /// Slowly drifting "scene" so consecutive frames differ.
    scene_state: u8,
}

impl StubStream {
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let grain: u8 = rand::thread_rng().gen_range(0..4);
        let width = self.width as usize;
        let pixel_count = width * self.height as usize;
        let mut rgba = vec![0u8; pixel_count * 4];
        for (i, pixel) in rgba.chunks_exact_mut(4).enumerate() {
            let x = (i % width) as u64;
            let y = (i / width) as u64;
            // Warm left half, cool right half, so mirroring is visible.
            let warm = x * 2 < width as u64;
            let band = ((x + self.frame_count + self.scene_state as u64) % 256) as u8;
            let (red, blue) = if warm { (200u8, 40u8) } else { (40u8, 200u8) };
            pixel[0] = red.wrapping_add(grain);
            pixel[1] = band;
            pixel[2] = blue.wrapping_add((y % 16) as u8);
            pixel[3] = 255;
        }
        rgba
    }
}

impl FrameStream for StubStream {
    fn start(&mut self) -> Result<(), AcquireError> {
        if self.fail_start {
            return Err(AcquireError::StreamStartFailed(
                "synthetic stream produced no frames".to_string(),
            ));
        }
        self.started = true;
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&mut self) -> anyhow::Result<CapturedFrame> {
        if !self.started {
            return Err(anyhow::anyhow!("stub stream not started"));
        }
        if self.frame_count > 0 {
            std::thread::sleep(self.interval);
        }
        self.frame_count += 1;
        let rgba = self.generate_pixels();
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        CapturedFrame::new(self.width, self.height, rgba)
    }

    fn stop(&mut self) {
        self.started = false;
        if self.claimed {
            self.claimed = false;
            self.counters.in_use.store(false, Ordering::SeqCst);
        }
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DeviceLease;

    fn constraints(size: u32) -> CaptureConstraints {
        CaptureConstraints {
            width: size,
            height: size,
            ..CaptureConstraints::default()
        }
    }

    #[test]
    fn uri_selects_outcome() -> anyhow::Result<()> {
        assert_eq!(StubDevices::from_uri("stub://user")?.outcome, StubOutcome::Grant);
        assert_eq!(StubDevices::from_uri("stub://denied")?.outcome, StubOutcome::Deny);
        assert_eq!(StubDevices::from_uri("stub://none")?.outcome, StubOutcome::NoDevice);
        assert_eq!(
            StubDevices::from_uri("stub://start-fails")?.outcome,
            StubOutcome::StartFails
        );
        assert_eq!(StubDevices::from_uri("stub://user?fps=120")?.fps, 120);
        assert_eq!(StubDevices::from_uri("stub://user")?.facing, Some(Facing::User));
        assert_eq!(StubDevices::from_uri("stub://lobby")?.facing, None);
        assert!(StubDevices::from_uri("stub://user?zoom=2").is_err());
        assert!(StubDevices::from_uri("/dev/video0").is_err());
        Ok(())
    }

    #[test]
    fn granted_stream_produces_frames_at_requested_size() -> anyhow::Result<()> {
        let devices = StubDevices::new(StubOutcome::Grant).with_fps(240);
        let mut lease = DeviceLease::new(devices.open(&constraints(8))?);
        lease.start()?;
        let first = lease.next_frame()?;
        let second = lease.next_frame()?;
        assert_eq!((first.width, first.height), (8, 8));
        assert_eq!(first.rgba.len(), 8 * 8 * 4);
        assert_ne!(first.rgba, second.rgba);
        assert_eq!(devices.frames(), 2);
        Ok(())
    }

    #[test]
    fn denied_and_missing_devices_are_categorized() {
        let denied = StubDevices::new(StubOutcome::Deny);
        assert!(matches!(
            denied.open(&constraints(4)).err(),
            Some(AcquireError::PermissionDenied(_))
        ));
        let none = StubDevices::new(StubOutcome::NoDevice);
        assert!(matches!(
            none.open(&constraints(4)).err(),
            Some(AcquireError::DeviceUnavailable(_))
        ));
        assert!(!denied.in_use());
    }

    #[test]
    fn device_is_exclusive_until_stopped() -> anyhow::Result<()> {
        let devices = StubDevices::new(StubOutcome::Grant);
        let lease = DeviceLease::new(devices.open(&constraints(4))?);
        assert!(devices.in_use());
        assert!(matches!(
            devices.open(&constraints(4)).err(),
            Some(AcquireError::DeviceUnavailable(_))
        ));
        drop(lease);
        assert!(!devices.in_use());
        assert_eq!(devices.stops(), 1);
        assert!(devices.open(&constraints(4)).is_ok());
        Ok(())
    }

    #[test]
    fn named_facing_must_match_the_request() -> anyhow::Result<()> {
        let devices = StubDevices::from_uri("stub://environment")?;
        assert!(matches!(
            devices.open(&constraints(4)).err(),
            Some(AcquireError::DeviceUnavailable(_))
        ));
        assert!(!devices.in_use());

        let rear = CaptureConstraints {
            facing: Facing::Environment,
            ..constraints(4)
        };
        let lease = DeviceLease::new(devices.open(&rear)?);
        assert!(devices.in_use());
        drop(lease);
        Ok(())
    }

    #[test]
    fn start_failure_releases_the_device() -> anyhow::Result<()> {
        let devices = StubDevices::new(StubOutcome::StartFails);
        let mut lease = DeviceLease::new(devices.open(&constraints(4))?);
        assert!(matches!(
            lease.start(),
            Err(AcquireError::StreamStartFailed(_))
        ));
        drop(lease);
        assert!(!devices.in_use());
        assert_eq!(devices.starts(), 0);
        Ok(())
    }

    #[test]
    fn gated_negotiation_waits_for_resolution() {
        let (devices, gate) = StubDevices::gated();
        assert!(gate.resolve(StubOutcome::Deny));
        assert!(matches!(
            devices.open(&constraints(4)).err(),
            Some(AcquireError::PermissionDenied(_))
        ));
        drop(gate);
        assert!(matches!(
            devices.open(&constraints(4)).err(),
            Some(AcquireError::DeviceUnavailable(_))
        ));
    }
}
