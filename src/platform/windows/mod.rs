pub(crate) mod d3d11;
pub(crate) mod desktop;
pub(crate) mod duplication;
pub(crate) mod monitor;
pub(crate) mod surface;

use std::sync::Arc;

use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{MONITOR_DEFAULTTONULL, MonitorFromWindow};
use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

use crate::backend::{DuplicationBackend, GraphicsAdapter};
use crate::error::GrabResult;
use crate::screen::MonitorHandle;

/// DXGI desktop duplication on Direct3D 11 devices.
pub(crate) struct DxgiBackend;

impl DxgiBackend {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl DuplicationBackend for DxgiBackend {
    fn enumerate_adapters(&self) -> GrabResult<Vec<Arc<dyn GraphicsAdapter>>> {
        monitor::enumerate_adapters()
    }

    fn switch_to_input_desktop(&self) -> GrabResult<()> {
        desktop::switch_to_input_desktop()
    }
}

pub(crate) fn monitor_from_window(raw_window: isize) -> Option<MonitorHandle> {
    let hwnd = HWND(raw_window as *mut core::ffi::c_void);
    let hmon = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONULL) };
    if hmon.0.is_null() {
        None
    } else {
        MonitorHandle::from_raw(hmon.0 as isize)
    }
}

pub(crate) fn foreground_window() -> Option<isize> {
    let hwnd = unsafe { GetForegroundWindow() };
    if hwnd.0.is_null() {
        None
    } else {
        Some(hwnd.0 as isize)
    }
}
