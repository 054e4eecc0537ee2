use deskslice_protocol::{Calibration, Monitor, Rect};

use crate::error::{Result, ServerError};

pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Map a normalized coordinate onto a pixel span, landing on `span - 1` at
/// the far edge so the result is always a valid pixel.
fn norm_to_pixels(norm: f64, span: i32) -> i32 {
    if span <= 1 {
        return 0;
    }
    (norm * f64::from(span - 1)).round() as i32
}

/// Presetup mode: map normalized coordinates onto the selected monitor.
pub fn norm_to_abs_presetup(xn: f64, yn: f64, monitor: &Monitor) -> (i32, i32) {
    let xn = clamp01(xn);
    let yn = clamp01(yn);
    (
        monitor.x + norm_to_pixels(xn, monitor.w),
        monitor.y + norm_to_pixels(yn, monitor.h),
    )
}

/// Run mode: map normalized coordinates onto the plugin rectangle
/// (already translated to virtual-desktop coordinates).
pub fn norm_to_abs_run(xn: f64, yn: f64, plugin: Rect) -> (i32, i32) {
    let xn = clamp01(xn);
    let yn = clamp01(yn);
    (
        plugin.x + norm_to_pixels(xn, plugin.w),
        plugin.y + norm_to_pixels(yn, plugin.h),
    )
}

/// Clamp a point into `[x, x+w-1] × [y, y+h-1]`. Degenerate rectangles leave
/// the point untouched.
pub fn clamp_point_to_rect(rect: Rect, x: i32, y: i32) -> (i32, i32) {
    let rect = rect.normalize();
    if rect.w <= 0 || rect.h <= 0 {
        return (x, y);
    }
    (
        x.clamp(rect.x, rect.x + rect.w - 1),
        y.clamp(rect.y, rect.y + rect.h - 1),
    )
}

pub fn rect_center(rect: Rect) -> (i32, i32) {
    let rect = rect.normalize();
    (rect.x + rect.w / 2, rect.y + rect.h / 2)
}

/// The calibrated plugin rectangle in virtual-desktop coordinates: the stored
/// monitor-relative rect translated by the origin of the monitor it was
/// calibrated on (falling back to the session's current monitor when the
/// calibration predates monitor tracking).
pub fn plugin_abs_virtual(
    calib: &Calibration,
    monitors: &[Monitor],
    session_monitor: i32,
) -> Result<Rect> {
    let index = if calib.monitor_index > 0 {
        calib.monitor_index
    } else {
        session_monitor
    };
    let monitor =
        Monitor::by_index(monitors, index).ok_or(ServerError::MonitorNotFound(index))?;
    let mut plugin = calib.plugin_abs.normalize();
    plugin.x += monitor.x;
    plugin.y += monitor.y;
    Ok(plugin)
}

/// Translate the chat rectangle (relative to the plugin) into virtual-desktop
/// coordinates.
pub fn chat_rect_abs(plugin_abs: Rect, chat_rel: Rect) -> Rect {
    let plugin = plugin_abs.normalize();
    let chat = chat_rel.normalize();
    Rect::new(plugin.x + chat.x, plugin.y + chat.y, chat.w, chat.h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Monitor {
        Monitor { index: 1, x: 100, y: 200, w: 300, h: 400, primary: true }
    }

    #[test]
    fn presetup_maps_corners_and_center() {
        let m = monitor();
        assert_eq!(norm_to_abs_presetup(0.0, 0.0, &m), (100, 200));
        assert_eq!(norm_to_abs_presetup(0.5, 0.5, &m), (250, 400));
        assert_eq!(norm_to_abs_presetup(1.0, 1.0, &m), (399, 599));
    }

    #[test]
    fn presetup_clamps_out_of_range_inputs() {
        let m = monitor();
        assert_eq!(norm_to_abs_presetup(-1.0, 2.0, &m), (100, 599));
    }

    #[test]
    fn run_maps_onto_the_plugin_rect() {
        let r = Rect::new(10, 20, 30, 40);
        assert_eq!(norm_to_abs_run(0.0, 0.0, r), (10, 20));
        assert_eq!(norm_to_abs_run(0.5, 0.5, r), (25, 40));
        assert_eq!(norm_to_abs_run(1.0, 1.0, r), (39, 59));
        assert_eq!(norm_to_abs_run(-1.0, 2.0, r), (10, 59));
    }

    #[test]
    fn degenerate_spans_map_to_the_origin() {
        let r = Rect::new(10, 20, 1, 0);
        assert_eq!(norm_to_abs_run(1.0, 1.0, r), (10, 20));
    }

    #[test]
    fn clamp_point_respects_the_cage_bounds() {
        let r = Rect::new(10, 20, 30, 40);
        assert_eq!(clamp_point_to_rect(r, -5, 999), (10, 59));
        assert_eq!(clamp_point_to_rect(r, 15, 25), (15, 25));
        assert_eq!(clamp_point_to_rect(r, 39, 59), (39, 59));
        assert_eq!(clamp_point_to_rect(r, 40, 60), (39, 59));
    }

    #[test]
    fn clamp_point_ignores_zero_area_rects() {
        assert_eq!(clamp_point_to_rect(Rect::default(), 7, 9), (7, 9));
    }

    #[test]
    fn center_normalizes_first() {
        assert_eq!(rect_center(Rect::new(100, 200, 300, 400)), (250, 400));
        assert_eq!(rect_center(Rect::new(400, 600, -300, -400)), (250, 400));
    }

    #[test]
    fn plugin_abs_virtual_translates_by_monitor_origin() {
        let monitors = vec![
            Monitor { index: 1, x: 0, y: 0, w: 1920, h: 1080, primary: true },
            Monitor { index: 2, x: 1920, y: 0, w: 1920, h: 1080, primary: false },
        ];
        let calib = Calibration {
            monitor_index: 2,
            plugin_abs: Rect::new(100, 200, 300, 400),
            ..Default::default()
        };
        let r = plugin_abs_virtual(&calib, &monitors, 1).unwrap();
        assert_eq!(r, Rect::new(2020, 200, 300, 400));
    }

    #[test]
    fn plugin_abs_virtual_falls_back_to_session_monitor() {
        let monitors = vec![Monitor { index: 1, x: 50, y: 60, w: 800, h: 600, primary: true }];
        let calib = Calibration {
            monitor_index: 0,
            plugin_abs: Rect::new(10, 20, 100, 100),
            ..Default::default()
        };
        let r = plugin_abs_virtual(&calib, &monitors, 1).unwrap();
        assert_eq!(r, Rect::new(60, 80, 100, 100));

        let err = plugin_abs_virtual(&calib, &monitors, 9).unwrap_err();
        assert!(matches!(err, ServerError::MonitorNotFound(9)));
    }

    #[test]
    fn chat_rect_translates_relative_offsets() {
        let plugin = Rect::new(100, 200, 300, 400);
        let chat = Rect::new(10, 350, 280, 40);
        assert_eq!(chat_rect_abs(plugin, chat), Rect::new(110, 550, 280, 40));
    }
}
