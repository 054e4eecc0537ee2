use deskslice_protocol::Monitor;

use crate::error::{Result, ServerError};

/// Enumerate attached displays in OS order with 1-based indices.
///
/// The list is captured once at startup and treated as immutable; changing
/// the display topology means restarting the server.
pub fn list_monitors() -> Result<Vec<Monitor>> {
    let monitors = platform::enumerate()?;
    if monitors.is_empty() {
        return Err(ServerError::NoMonitors);
    }
    Ok(monitors)
}

#[cfg(windows)]
mod platform {
    use deskslice_protocol::Monitor;

    use crate::error::Result;

    use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOF_PRIMARY,
    };

    pub fn enumerate() -> Result<Vec<Monitor>> {
        unsafe extern "system" fn collect(
            handle: HMONITOR,
            _hdc: HDC,
            _clip: *mut RECT,
            data: LPARAM,
        ) -> BOOL {
            let list = &mut *(data.0 as *mut Vec<Monitor>);
            let mut info = MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                ..Default::default()
            };
            if GetMonitorInfoW(handle, &mut info).as_bool() {
                let r = info.rcMonitor;
                list.push(Monitor {
                    index: list.len() as i32 + 1,
                    x: r.left,
                    y: r.top,
                    w: r.right - r.left,
                    h: r.bottom - r.top,
                    primary: info.dwFlags & MONITORINFOF_PRIMARY != 0,
                });
            }
            TRUE
        }

        let mut list: Vec<Monitor> = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(collect),
                LPARAM(&mut list as *mut Vec<Monitor> as isize),
            );
        }
        Ok(list)
    }
}

#[cfg(not(windows))]
mod platform {
    use deskslice_protocol::Monitor;

    use crate::error::{Result, ServerError};

    pub fn enumerate() -> Result<Vec<Monitor>> {
        Err(ServerError::MonitorsUnsupported)
    }
}
