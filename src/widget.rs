use crate::screen::MonitorHandle;

/// Something shown on a monitor whose colors the consumer wants sampled.
pub trait MonitorLocator {
    /// The physical monitor the widget is on, if any.
    fn monitor(&self) -> Option<MonitorHandle>;
}

impl MonitorLocator for MonitorHandle {
    fn monitor(&self) -> Option<MonitorHandle> {
        Some(*self)
    }
}

impl<T: MonitorLocator + ?Sized> MonitorLocator for &T {
    fn monitor(&self) -> Option<MonitorHandle> {
        (**self).monitor()
    }
}

/// Native top-level window handle (`HWND` on Windows).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId {
    handle: isize,
}

impl WindowId {
    pub const fn from_raw_handle(raw_handle: isize) -> Self {
        Self { handle: raw_handle }
    }

    pub const fn raw_handle(&self) -> isize {
        self.handle
    }
}

impl MonitorLocator for WindowId {
    fn monitor(&self) -> Option<MonitorHandle> {
        crate::platform::monitor_from_window(self.handle)
    }
}

/// The window currently in the foreground, if the platform has one.
pub fn foreground_window() -> Option<WindowId> {
    crate::platform::foreground_window().map(WindowId::from_raw_handle)
}
