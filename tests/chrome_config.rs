use std::sync::Mutex;

use tempfile::NamedTempFile;

use liquid_chrome::config::ChromeConfig;
use liquid_chrome::{EnvironmentPreset, Facing, FallbackPolicy, Rgb};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CHROME_CONFIG",
        "CHROME_CAMERA_DEVICE",
        "CHROME_CAMERA_WIDTH",
        "CHROME_CAMERA_HEIGHT",
        "CHROME_FALLBACK",
        "CHROME_FALLBACK_PRESET",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_request_a_square_user_camera() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ChromeConfig::load().expect("load defaults");

    assert_eq!(cfg.camera.device, "stub://user");
    assert_eq!(cfg.camera.constraints.width, 1024);
    assert_eq!(cfg.camera.constraints.height, 1024);
    assert_eq!(cfg.camera.constraints.facing, Facing::User);
    assert_eq!(cfg.reflection_intensity, 1.2);
    assert_eq!(
        cfg.fallback_policy().unwrap(),
        FallbackPolicy::FlatTone {
            base: Rgb::new(0xc0, 0xc0, 0xc8)
        }
    );
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r##"{
            "camera": {
                "device": "/dev/video2",
                "width": 640,
                "height": 480,
                "facing": "environment"
            },
            "fallback": {
                "policy": "flat",
                "color": "#a0a4ab",
                "preset": "studio"
            },
            "surface": {
                "reflection_intensity": 0.8
            }
        }"##,
    );

    std::env::set_var("CHROME_CONFIG", file.path());
    std::env::set_var("CHROME_CAMERA_HEIGHT", "640");
    std::env::set_var("CHROME_FALLBACK", "environment");

    let cfg = ChromeConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!(cfg.camera.constraints.width, 640);
    assert_eq!(cfg.camera.constraints.height, 640);
    assert_eq!(cfg.camera.constraints.facing, Facing::Environment);
    assert_eq!(cfg.reflection_intensity, 0.8);
    assert_eq!(
        cfg.fallback_policy().unwrap(),
        FallbackPolicy::Environment {
            preset: EnvironmentPreset::Studio
        }
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CHROME_CAMERA_WIDTH", "0");
    assert!(ChromeConfig::load().is_err());
    clear_env();

    std::env::set_var("CHROME_CAMERA_WIDTH", "wide");
    assert!(ChromeConfig::load().is_err());
    clear_env();

    std::env::set_var("CHROME_FALLBACK", "hologram");
    assert!(ChromeConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "fallback": { "color": "chrome" } }"#);
    std::env::set_var("CHROME_CONFIG", file.path());
    assert!(ChromeConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "camera": { "facing": "sideways" } }"#);
    std::env::set_var("CHROME_CONFIG", file.path());
    assert!(ChromeConfig::load().is_err());
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("CHROME_CONFIG", file.path());
    let err = ChromeConfig::load().expect_err("malformed file");
    assert!(err.to_string().contains("invalid config file"));
    clear_env();
}
