//! chrome_preview - headless run of the liquid chrome reflection pipeline
//!
//! Acquires the configured camera, drives a fixed-cadence render loop that
//! keeps a chrome material in sync with the camera texture, and reports what
//! the surface would have shown.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use liquid_chrome::{
    idle_rotation, open_devices, CameraTextureProvider, ChromeConfig, ReflectionInput,
    ReflectiveSurfacePresenter, RenderBranch,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of render-loop frames to run.
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Render-loop frames per second.
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Camera device (stub://user, stub://denied, /dev/video0, ...).
    #[arg(long, env = "CHROME_CAMERA_DEVICE")]
    device: Option<String>,
    /// Requested capture width.
    #[arg(long)]
    width: Option<u32>,
    /// Requested capture height.
    #[arg(long)]
    height: Option<u32>,
    /// Fallback finish while there is no camera (flat|environment).
    #[arg(long)]
    fallback: Option<String>,
    /// Retry acquisition once if the first attempt fails.
    #[arg(long)]
    retry: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    stage("load configuration");
    let mut cfg = ChromeConfig::load()?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    if let Some(width) = args.width {
        cfg.camera.constraints.width = width;
    }
    if let Some(height) = args.height {
        cfg.camera.constraints.height = height;
    }
    if let Some(fallback) = args.fallback {
        cfg.fallback.policy = fallback;
    }
    cfg.validate()?;
    let policy = cfg.fallback_policy()?;

    let devices = open_devices(&cfg.camera.device)?;
    let mut provider = CameraTextureProvider::new(devices, cfg.camera.constraints.clone());
    let mut presenter = ReflectiveSurfacePresenter::new(policy, cfg.reflection_intensity);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    stage("render loop");
    provider.acquire();
    let frame_interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let started = Instant::now();
    let mut retried = false;
    let mut reflecting_frames = 0u64;

    for frame in 0..args.frames {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested after {} frames", frame);
            break;
        }
        let tick = Instant::now();

        provider.update();
        if presenter.sync(&provider) {
            if let Some(caption) = presenter.caption() {
                log::info!("overlay: {}", caption);
            }
        }
        if args.retry && !retried && provider.status().is_failure() {
            retried = true;
            log::info!("retrying camera acquisition");
            provider.acquire();
        }

        let [rx, ry] = idle_rotation(started.elapsed().as_secs_f32());
        if presenter.branch() == RenderBranch::Reflecting {
            reflecting_frames += 1;
        }
        if frame % args.fps as u64 == 0 {
            log_surface(&presenter, [rx, ry]);
        }

        if let Some(remaining) = frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    stage("release camera");
    provider.release();
    presenter.sync(&provider);

    let stats = provider.stats();
    println!("status:              {}", provider.status());
    if let Some(err) = provider.last_error() {
        println!("last error:          {}", err);
    }
    println!("acquisitions:        {}", stats.acquisitions);
    println!("frames presented:    {}", stats.frames_presented);
    println!("reflecting frames:   {}", reflecting_frames);
    println!("final branch:        {:?}", presenter.branch());
    Ok(())
}

/// Log what the surface reflects straight back at the viewer.
fn log_surface(presenter: &ReflectiveSurfacePresenter, rotation: [f32; 2]) {
    // Normal tilted by the idle sway; the viewer looks down -Z.
    let [rx, ry] = rotation;
    let normal = [ry.sin(), -rx.sin(), rx.cos() * ry.cos()];
    let material = presenter.material();
    match &material.reflection {
        ReflectionInput::Camera(texture) => {
            let sample = texture.sample(normal).unwrap_or([0.0; 4]);
            log::info!(
                "surface: camera {} v{} reflects rgb({:.3}, {:.3}, {:.3})",
                texture.id(),
                texture.version(),
                sample[0],
                sample[1],
                sample[2]
            );
        }
        ReflectionInput::Environment(preset) => {
            let sample = preset.sample(normal);
            log::info!(
                "surface: {} environment reflects rgb({:.3}, {:.3}, {:.3})",
                preset.as_str(),
                sample[0],
                sample[1],
                sample[2]
            );
        }
        ReflectionInput::None => {
            log::info!(
                "surface: flat {} (metalness {:.2}, roughness {:.2})",
                material.base_color,
                material.metalness,
                material.roughness
            );
        }
    }
}

fn stage(name: &str) {
    eprintln!("==> {}", name);
}
