use deskslice_protocol::{Mode, Monitor, Rect};

/// Encoder runtime parameters, resolved from configuration.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub ffmpeg_path: String,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub capture_driver: String,
}

/// ffmpeg arguments for the RTP encode pipeline: full monitor in presetup,
/// cropped to the plugin rectangle in run mode.
pub fn build_rtp_args(
    mode: Mode,
    monitor: &Monitor,
    plugin: Rect,
    opts: &EncoderOptions,
    port: u16,
    driver: &str,
) -> Vec<String> {
    let crop = match mode {
        Mode::Run => {
            let r = normalize_crop_rect(plugin, monitor);
            Some(format!("crop={}:{}:{}:{}", r.w, r.h, r.x, r.y))
        }
        Mode::Presetup => None,
    };
    let mut args = build_input_args(monitor, opts, driver);
    args.extend(build_output_args(opts, port, crop));
    args
}

/// ffmpeg arguments for the MJPEG preview pipeline (raw rgb24 on stdout),
/// plus the output frame dimensions the reader must consume.
pub fn build_preview_args(
    mode: Mode,
    monitor: &Monitor,
    plugin: Rect,
    opts: &EncoderOptions,
) -> (Vec<String>, i32, i32) {
    let mut args = build_input_args(monitor, opts, &opts.capture_driver);
    let (out_w, out_h) = match mode {
        Mode::Run => {
            let r = normalize_crop_rect(plugin, monitor);
            args.push("-vf".to_string());
            args.push(format!("crop={}:{}:{}:{}", r.w, r.h, r.x, r.y));
            (r.w, r.h)
        }
        Mode::Presetup => (monitor.w, monitor.h),
    };
    for a in ["-an", "-pix_fmt", "rgb24", "-f", "rawvideo", "-"] {
        args.push(a.to_string());
    }
    (args, out_w, out_h)
}

fn build_input_args(monitor: &Monitor, opts: &EncoderOptions, driver: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        driver.to_string(),
        "-framerate".to_string(),
        effective_fps(opts).to_string(),
        "-offset_x".to_string(),
        monitor.x.to_string(),
        "-offset_y".to_string(),
        monitor.y.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", monitor.w, monitor.h),
        "-i".to_string(),
        "desktop".to_string(),
    ]
}

fn build_output_args(opts: &EncoderOptions, port: u16, crop: Option<String>) -> Vec<String> {
    // Frequent keyframes help decoders recover quickly after restarts and
    // crop changes.
    let keyint = effective_fps(opts).max(15);
    let bitrate = if opts.bitrate_kbps == 0 { 6000 } else { opts.bitrate_kbps };

    let mut args = vec!["-an".to_string()];
    if let Some(filter) = crop {
        args.push("-vf".to_string());
        args.push(filter);
    }
    for a in [
        "-vcodec",
        "libx264",
        "-preset",
        "ultrafast",
        "-tune",
        "zerolatency",
        "-profile:v",
        "baseline",
    ] {
        args.push(a.to_string());
    }
    args.push("-g".to_string());
    args.push(keyint.to_string());
    args.push("-keyint_min".to_string());
    args.push(keyint.to_string());
    args.push("-bf".to_string());
    args.push("0".to_string());
    args.push("-x264-params".to_string());
    args.push("scenecut=0:repeat-headers=1".to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-b:v".to_string());
    args.push(format!("{bitrate}k"));
    args.push("-payload_type".to_string());
    args.push("96".to_string());
    args.push("-f".to_string());
    args.push("rtp".to_string());
    args.push(format!("rtp://127.0.0.1:{port}?pkt_size=1200"));
    args
}

fn effective_fps(opts: &EncoderOptions) -> u32 {
    if opts.fps == 0 {
        30
    } else {
        opts.fps
    }
}

/// Clamp a crop rectangle inside the monitor and align it to even geometry
/// with dimensions of at least 2 (libx264 yuv420p requires even sizes).
pub fn normalize_crop_rect(rect: Rect, monitor: &Monitor) -> Rect {
    let mut r = rect.normalize();
    // Clamping can break even alignment and aligning can push past an edge,
    // so the sequence runs twice before the final bounds check.
    for _ in 0..2 {
        enforce_min_dims(&mut r);
        clamp_into(&mut r, monitor);
        align_even(&mut r);
    }
    enforce_min_dims(&mut r);
    clamp_into(&mut r, monitor);
    r
}

fn enforce_min_dims(r: &mut Rect) {
    if r.w < 2 {
        r.w = 2;
    }
    if r.h < 2 {
        r.h = 2;
    }
}

fn clamp_into(r: &mut Rect, monitor: &Monitor) {
    if r.x < 0 {
        r.x = 0;
    }
    if r.y < 0 {
        r.y = 0;
    }
    if r.x + r.w > monitor.w {
        r.x = (monitor.w - r.w).max(0);
    }
    if r.y + r.h > monitor.h {
        r.y = (monitor.h - r.h).max(0);
    }
}

fn align_even(r: &mut Rect) {
    r.x -= r.x & 1;
    r.y -= r.y & 1;
    r.w -= r.w & 1;
    r.h -= r.h & 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Monitor {
        Monitor { index: 1, x: 0, y: 0, w: 1920, h: 1080, primary: true }
    }

    fn opts() -> EncoderOptions {
        EncoderOptions {
            ffmpeg_path: "ffmpeg".to_string(),
            fps: 30,
            bitrate_kbps: 6000,
            capture_driver: "gdigrab".to_string(),
        }
    }

    #[test]
    fn presetup_args_capture_the_full_monitor() {
        let m = Monitor { index: 2, x: 1920, y: 0, w: 2560, h: 1440, primary: false };
        let args = build_rtp_args(Mode::Presetup, &m, Rect::default(), &opts(), 5004, "gdigrab");
        let joined = args.join(" ");
        assert!(joined.starts_with("-f gdigrab -framerate 30 -offset_x 1920 -offset_y 0"));
        assert!(joined.contains("-video_size 2560x1440"));
        assert!(joined.contains("-i desktop"));
        assert!(!joined.contains("crop="));
        assert!(joined.contains("-vcodec libx264"));
        assert!(joined.contains("-profile:v baseline"));
        assert!(joined.contains("-x264-params scenecut=0:repeat-headers=1"));
        assert!(joined.contains("-payload_type 96"));
        assert!(joined.ends_with("rtp://127.0.0.1:5004?pkt_size=1200"));
    }

    #[test]
    fn run_args_crop_to_the_plugin_rect() {
        let args = build_rtp_args(
            Mode::Run,
            &monitor(),
            Rect::new(100, 200, 300, 400),
            &opts(),
            6000,
            "gdigrab",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-vf crop=300:400:100:200"));
    }

    #[test]
    fn keyframe_interval_is_at_least_15() {
        let mut o = opts();
        o.fps = 10;
        let args = build_rtp_args(Mode::Presetup, &monitor(), Rect::default(), &o, 6000, "gdigrab");
        let joined = args.join(" ");
        assert!(joined.contains("-g 15"));
        assert!(joined.contains("-keyint_min 15"));

        o.fps = 60;
        let args = build_rtp_args(Mode::Presetup, &monitor(), Rect::default(), &o, 6000, "gdigrab");
        assert!(args.join(" ").contains("-g 60"));
    }

    #[test]
    fn preview_args_emit_raw_rgb_frames() {
        let (args, w, h) = build_preview_args(Mode::Presetup, &monitor(), Rect::default(), &opts());
        let joined = args.join(" ");
        assert!(joined.ends_with("-an -pix_fmt rgb24 -f rawvideo -"));
        assert_eq!((w, h), (1920, 1080));

        let (args, w, h) =
            build_preview_args(Mode::Run, &monitor(), Rect::new(10, 10, 301, 200), &opts());
        assert!(args.join(" ").contains("crop=300:200:10:10"));
        assert_eq!((w, h), (300, 200));
    }

    #[test]
    fn crop_rect_is_normalized_even_and_bounded() {
        let m = monitor();

        // Negative sizes are flipped before cropping.
        let r = normalize_crop_rect(Rect::new(500, 500, -100, -50), &m);
        assert_eq!(r, Rect::new(400, 450, 100, 50));

        // Odd geometry is pulled to even coordinates.
        let r = normalize_crop_rect(Rect::new(101, 201, 301, 401), &m);
        assert_eq!(r.x & 1, 0);
        assert_eq!(r.y & 1, 0);
        assert_eq!(r.w & 1, 0);
        assert_eq!(r.h & 1, 0);
        assert!(r.w >= 2 && r.h >= 2);

        // A rect hanging off the monitor is pulled back inside.
        let r = normalize_crop_rect(Rect::new(1900, 1000, 300, 400), &m);
        assert!(r.x + r.w <= m.w);
        assert!(r.y + r.h <= m.h);
        assert!(r.x >= 0 && r.y >= 0);

        // Degenerate input still yields a minimal valid crop.
        let r = normalize_crop_rect(Rect::default(), &m);
        assert!(r.w >= 2 && r.h >= 2);
    }
}
