use std::sync::Arc;

use crate::error::{Result, ServerError};

/// Host input operations the control plane depends on.
///
/// Implementations must be safe to call from multiple tasks; each call is a
/// single, self-contained injection.
pub trait Injector: Send + Sync {
    fn move_abs(&self, x: i32, y: i32) -> Result<()>;
    fn left_down(&self) -> Result<()>;
    fn left_up(&self) -> Result<()>;
    fn type_unicode(&self, text: &str) -> Result<()>;
    fn enter(&self) -> Result<()>;
    fn select_all(&self) -> Result<()>;
    fn delete(&self) -> Result<()>;
    fn wheel(&self, delta: i32) -> Result<()>;
    fn hwheel(&self, delta: i32) -> Result<()>;

    /// The current cursor position, when the platform can report it.
    fn cursor_pos(&self) -> Option<(i32, i32)>;

    /// Move to a point and perform a left click there.
    fn click_at(&self, x: i32, y: i32) -> Result<()> {
        self.move_abs(x, y)?;
        self.left_down()?;
        self.left_up()
    }
}

/// Build the platform injector. On platforms without OS input injection the
/// server still runs — control attempts fail with `InputUnsupported` while
/// the video pipeline stays independent.
pub fn new_injector() -> Arc<dyn Injector> {
    #[cfg(windows)]
    {
        Arc::new(platform::WinInjector)
    }
    #[cfg(not(windows))]
    {
        tracing::warn!("input injection is not supported on this platform; control actions will fail");
        Arc::new(NoopInjector)
    }
}

/// Sentinel injector for platforms without OS input support.
pub struct NoopInjector;

impl Injector for NoopInjector {
    fn move_abs(&self, _x: i32, _y: i32) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn left_down(&self) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn left_up(&self) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn type_unicode(&self, _text: &str) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn enter(&self) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn select_all(&self) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn delete(&self) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn wheel(&self, _delta: i32) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn hwheel(&self, _delta: i32) -> Result<()> {
        Err(ServerError::InputUnsupported)
    }
    fn cursor_pos(&self) -> Option<(i32, i32)> {
        None
    }
}

#[cfg(windows)]
mod platform {
    use super::Injector;
    use crate::error::{Result, ServerError};

    use windows::Win32::Foundation::POINT;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
        KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_HWHEEL,
        MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_VIRTUALDESK,
        MOUSEEVENTF_WHEEL, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_CONTROL, VK_DELETE,
        VK_RETURN,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetCursorPos, GetSystemMetrics, SetCursorPos, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN,
        SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN,
    };

    const VK_A: VIRTUAL_KEY = VIRTUAL_KEY(0x41);

    /// SendInput-based injector for the Windows virtual desktop.
    pub struct WinInjector;

    fn send_one(input: INPUT) -> Result<()> {
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(ServerError::Injection("SendInput rejected the event".to_string()))
        }
    }

    fn send_mouse(flags: MOUSE_EVENT_FLAGS, dx: i32, dy: i32, data: i32) -> Result<()> {
        send_one(INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data as u32,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        })
    }

    fn send_key(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> Result<()> {
        send_one(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        })
    }

    fn press_and_release(vk: VIRTUAL_KEY) -> Result<()> {
        send_key(vk, 0, KEYBD_EVENT_FLAGS(0))?;
        send_key(vk, 0, KEYEVENTF_KEYUP)
    }

    /// Map screen coordinates into the 0..65535 range SendInput expects for
    /// absolute motion across the virtual desktop.
    fn map_absolute(x: i32, y: i32) -> (i32, i32) {
        let vx = unsafe { GetSystemMetrics(SM_XVIRTUALSCREEN) };
        let vy = unsafe { GetSystemMetrics(SM_YVIRTUALSCREEN) };
        let vw = unsafe { GetSystemMetrics(SM_CXVIRTUALSCREEN) }.max(2);
        let vh = unsafe { GetSystemMetrics(SM_CYVIRTUALSCREEN) }.max(2);
        let dx = (i64::from(x) - i64::from(vx)) * 65_535 / i64::from(vw - 1);
        let dy = (i64::from(y) - i64::from(vy)) * 65_535 / i64::from(vh - 1);
        (dx as i32, dy as i32)
    }

    impl Injector for WinInjector {
        fn move_abs(&self, x: i32, y: i32) -> Result<()> {
            if unsafe { SetCursorPos(x, y) }.is_ok() {
                return Ok(());
            }
            let (dx, dy) = map_absolute(x, y);
            send_mouse(MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK, dx, dy, 0)
        }

        fn left_down(&self) -> Result<()> {
            send_mouse(MOUSEEVENTF_LEFTDOWN, 0, 0, 0)
        }

        fn left_up(&self) -> Result<()> {
            send_mouse(MOUSEEVENTF_LEFTUP, 0, 0, 0)
        }

        fn type_unicode(&self, text: &str) -> Result<()> {
            for code in text.encode_utf16() {
                send_key(VIRTUAL_KEY(0), code, KEYEVENTF_UNICODE)?;
                send_key(VIRTUAL_KEY(0), code, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP)?;
            }
            Ok(())
        }

        fn enter(&self) -> Result<()> {
            press_and_release(VK_RETURN)
        }

        fn select_all(&self) -> Result<()> {
            send_key(VK_CONTROL, 0, KEYBD_EVENT_FLAGS(0))?;
            let result = press_and_release(VK_A);
            // Release Ctrl even when A failed, or the host keyboard wedges.
            let ctrl_up = send_key(VK_CONTROL, 0, KEYEVENTF_KEYUP);
            result.and(ctrl_up)
        }

        fn delete(&self) -> Result<()> {
            press_and_release(VK_DELETE)
        }

        fn wheel(&self, delta: i32) -> Result<()> {
            send_mouse(MOUSEEVENTF_WHEEL, 0, 0, delta)
        }

        fn hwheel(&self, delta: i32) -> Result<()> {
            send_mouse(MOUSEEVENTF_HWHEEL, 0, 0, delta)
        }

        fn cursor_pos(&self) -> Option<(i32, i32)> {
            let mut p = POINT::default();
            if unsafe { GetCursorPos(&mut p) }.is_ok() {
                Some((p.x, p.y))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_injector_reports_unsupported() {
        let inj = NoopInjector;
        assert!(matches!(inj.move_abs(1, 2), Err(ServerError::InputUnsupported)));
        assert!(matches!(inj.click_at(1, 2), Err(ServerError::InputUnsupported)));
        assert!(matches!(inj.wheel(120), Err(ServerError::InputUnsupported)));
        assert!(inj.cursor_pos().is_none());
    }
}
