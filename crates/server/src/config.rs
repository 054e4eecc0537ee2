use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, ServerError};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8787";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
pub const DEFAULT_CAPTURE_DRIVER: &str = "gdigrab";
const DEFAULT_FPS: u32 = 30;
const DEFAULT_BITRATE_KBPS: u32 = 6000;
const DEFAULT_MONITOR_INDEX: i32 = 1;
const DEFAULT_MJPEG_INTERVAL_MS: u64 = 120;
const DEFAULT_MJPEG_QUALITY: u32 = 60;
const DEFAULT_SCROLL_HOLD_MS: u64 = 2500;
const DEFAULT_SCROLL_TICK_MS: u64 = 50;
const DEFAULT_SCROLL_MAX_DELTA: i32 = 240;
const DEFAULT_VIEWER_POLICY: &str = "replace";

/// Runtime configuration, resolved from `data/.env` plus the process
/// environment (the environment wins).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub ui_password: String,
    pub data_dir: PathBuf,
    pub calib_path: PathBuf,
    pub ffmpeg_path: String,
    pub capture_driver: String,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub monitor_index: i32,
    pub mjpeg_enabled: bool,
    pub mjpeg_interval_ms: u64,
    pub mjpeg_quality: u32,
    pub scroll_hold_ms: u64,
    pub scroll_tick_ms: u64,
    pub scroll_max_delta: i32,
    /// `replace` (default) kicks the current viewer for a newcomer;
    /// `reject` refuses the newcomer instead.
    pub viewer_policy: String,
}

impl Config {
    /// Load configuration from `./data/.env` and the process environment.
    pub fn load() -> Result<Self> {
        let mut vars = HashMap::new();
        let env_path = Path::new(DEFAULT_DATA_DIR).join(".env");
        match std::fs::read_to_string(&env_path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if let Some((key, value)) = parse_env_line(line) {
                        vars.insert(key, value);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ServerError::Config(format!(
                    "reading {}: {e}",
                    env_path.display()
                )))
            }
        }
        // Existing environment wins over the .env file.
        for (key, value) in std::env::vars() {
            vars.insert(key, value);
        }
        Self::from_vars(&vars)
    }

    /// Resolve a configuration from a flat key/value map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let data_dir = PathBuf::from(string_var(vars, "DATA_DIR", DEFAULT_DATA_DIR));
        let calib_path = match trimmed(vars, "CALIB_PATH") {
            Some(p) => PathBuf::from(p),
            None => data_dir.join("calib.json"),
        };

        let mjpeg_quality = int_var(vars, "MJPEG_QUALITY", DEFAULT_MJPEG_QUALITY)?;
        if mjpeg_quality == 0 || mjpeg_quality > 100 {
            return Err(ServerError::Config("MJPEG_QUALITY must be 1-100".into()));
        }
        let scroll_tick_ms = int_var(vars, "SCROLL_OVERLAY_TICK_MS", DEFAULT_SCROLL_TICK_MS)?;
        if scroll_tick_ms == 0 {
            return Err(ServerError::Config("SCROLL_OVERLAY_TICK_MS must be > 0".into()));
        }
        let scroll_max_delta = int_var(vars, "SCROLL_OVERLAY_MAX_DELTA", DEFAULT_SCROLL_MAX_DELTA)?;
        if scroll_max_delta <= 0 {
            return Err(ServerError::Config("SCROLL_OVERLAY_MAX_DELTA must be > 0".into()));
        }

        let ui_password = trimmed(vars, "UI_PASSWORD").unwrap_or_default();
        if ui_password.is_empty() {
            return Err(ServerError::Config("UI_PASSWORD is required".into()));
        }

        Ok(Self {
            listen_addr: string_var(vars, "LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            ui_password,
            calib_path,
            data_dir,
            ffmpeg_path: string_var(vars, "FFMPEG_PATH", DEFAULT_FFMPEG_PATH),
            capture_driver: normalize_capture_driver(&string_var(
                vars,
                "CAPTURE_DRIVER",
                DEFAULT_CAPTURE_DRIVER,
            )),
            fps: int_var(vars, "FPS", DEFAULT_FPS)?,
            bitrate_kbps: int_var(vars, "BITRATE_KBPS", DEFAULT_BITRATE_KBPS)?,
            monitor_index: int_var(vars, "MONITOR_INDEX", DEFAULT_MONITOR_INDEX)?,
            mjpeg_enabled: bool_var(vars, "MJPEG_ENABLED", true),
            mjpeg_interval_ms: int_var(vars, "MJPEG_INTERVAL_MS", DEFAULT_MJPEG_INTERVAL_MS)?,
            mjpeg_quality,
            scroll_hold_ms: int_var(vars, "SCROLL_OVERLAY_HOLD_MS", DEFAULT_SCROLL_HOLD_MS)?,
            scroll_tick_ms,
            scroll_max_delta,
            viewer_policy: normalize_viewer_policy(&string_var(
                vars,
                "VIEWER_POLICY",
                DEFAULT_VIEWER_POLICY,
            )),
        })
    }
}

/// Only `replace` and `reject` are meaningful; anything else means replace.
fn normalize_viewer_policy(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "reject" => "reject".to_string(),
        _ => DEFAULT_VIEWER_POLICY.to_string(),
    }
}

/// Only `gdigrab` and `d3d11grab` are accepted; anything else falls back to
/// the generic GDI grabber.
fn normalize_capture_driver(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "d3d11grab" => "d3d11grab".to_string(),
        _ => DEFAULT_CAPTURE_DRIVER.to_string(),
    }
}

fn trimmed(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn string_var(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    trimmed(vars, key).unwrap_or_else(|| default.to_string())
}

fn int_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
{
    match trimmed(vars, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ServerError::Config(format!("{key} must be an integer"))),
        None => Ok(default),
    }
}

fn bool_var(vars: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match trimmed(vars, key).as_deref().map(str::to_ascii_lowercase) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "n" | "off") => false,
        _ => default,
    }
}

/// Parse one `.env` line into a key/value pair.
///
/// Supports `#` comments, an optional `export ` prefix, and single or double
/// quotes around the value.
pub fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map(str::trim).unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("UI_PASSWORD".to_string(), "pw".to_string());
        vars
    }

    #[test]
    fn defaults_apply_when_only_password_is_set() {
        let cfg = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8787");
        assert_eq!(cfg.ffmpeg_path, "ffmpeg");
        assert_eq!(cfg.capture_driver, "gdigrab");
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.bitrate_kbps, 6000);
        assert_eq!(cfg.monitor_index, 1);
        assert!(cfg.mjpeg_enabled);
        assert_eq!(cfg.mjpeg_interval_ms, 120);
        assert_eq!(cfg.mjpeg_quality, 60);
        assert_eq!(cfg.scroll_max_delta, 240);
        assert_eq!(cfg.viewer_policy, "replace");
        assert_eq!(cfg.calib_path, PathBuf::from("./data/calib.json"));
    }

    #[test]
    fn viewer_policy_normalizes() {
        let mut vars = base_vars();
        vars.insert("VIEWER_POLICY".to_string(), "REJECT".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().viewer_policy, "reject");
        vars.insert("VIEWER_POLICY".to_string(), "whatever".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().viewer_policy, "replace");
    }

    #[test]
    fn missing_password_is_fatal() {
        let err = Config::from_vars(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ServerError::Config(msg) if msg.contains("UI_PASSWORD")));
    }

    #[test]
    fn calib_path_follows_data_dir() {
        let mut vars = base_vars();
        vars.insert("DATA_DIR".to_string(), "/srv/deskslice".to_string());
        let cfg = Config::from_vars(&vars).unwrap();
        assert_eq!(cfg.calib_path, PathBuf::from("/srv/deskslice/calib.json"));

        vars.insert("CALIB_PATH".to_string(), "/etc/ds/calib.json".to_string());
        let cfg = Config::from_vars(&vars).unwrap();
        assert_eq!(cfg.calib_path, PathBuf::from("/etc/ds/calib.json"));
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let mut vars = base_vars();
        vars.insert("MJPEG_QUALITY".to_string(), "500".to_string());
        assert!(Config::from_vars(&vars).is_err());
        vars.insert("MJPEG_QUALITY".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let mut vars = base_vars();
        vars.insert("FPS".to_string(), "fast".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ServerError::Config(msg) if msg.contains("FPS")));
    }

    #[test]
    fn unknown_capture_driver_falls_back_to_gdigrab() {
        let mut vars = base_vars();
        vars.insert("CAPTURE_DRIVER".to_string(), "x11grab".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().capture_driver, "gdigrab");
        vars.insert("CAPTURE_DRIVER".to_string(), "D3D11GRAB".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().capture_driver, "d3d11grab");
    }

    #[test]
    fn env_line_parsing() {
        assert_eq!(
            parse_env_line("KEY=value"),
            Some(("KEY".to_string(), "value".to_string()))
        );
        assert_eq!(
            parse_env_line("export KEY=\"quoted value\""),
            Some(("KEY".to_string(), "quoted value".to_string()))
        );
        assert_eq!(
            parse_env_line("  KEY = 'v' "),
            Some(("KEY".to_string(), "v".to_string()))
        );
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line(""), None);
        assert_eq!(parse_env_line("no_equals_here"), None);
        assert_eq!(parse_env_line("=value"), None);
    }
}
