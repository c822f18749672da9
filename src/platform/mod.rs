use std::sync::Arc;

use crate::backend::DuplicationBackend;
#[cfg(not(target_os = "windows"))]
use crate::backend::GraphicsAdapter;
#[cfg(not(target_os = "windows"))]
use crate::error::GrabError;
use crate::error::GrabResult;
use crate::screen::MonitorHandle;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> GrabError {
    GrabError::Unsupported("desktop duplication is only supported on Windows".to_string())
}

#[cfg(not(target_os = "windows"))]
struct UnsupportedBackend;

#[cfg(not(target_os = "windows"))]
impl DuplicationBackend for UnsupportedBackend {
    fn enumerate_adapters(&self) -> GrabResult<Vec<Arc<dyn GraphicsAdapter>>> {
        Err(unsupported_error())
    }

    fn switch_to_input_desktop(&self) -> GrabResult<()> {
        Err(unsupported_error())
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn build_backend() -> GrabResult<Arc<dyn DuplicationBackend>> {
    Ok(Arc::new(windows::DxgiBackend::new()))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn build_backend() -> GrabResult<Arc<dyn DuplicationBackend>> {
    Ok(Arc::new(UnsupportedBackend))
}

#[cfg(target_os = "windows")]
pub(crate) fn monitor_from_window(raw_window: isize) -> Option<MonitorHandle> {
    windows::monitor_from_window(raw_window)
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn monitor_from_window(_raw_window: isize) -> Option<MonitorHandle> {
    None
}

#[cfg(target_os = "windows")]
pub(crate) fn foreground_window() -> Option<isize> {
    windows::foreground_window()
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn foreground_window() -> Option<isize> {
    None
}
