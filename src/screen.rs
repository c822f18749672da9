use std::fmt;

/// Opaque platform monitor handle (`HMONITOR` on Windows).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MonitorHandle(isize);

impl MonitorHandle {
    /// Returns `None` for the null handle, which platforms report while a
    /// display topology change is still being applied.
    pub const fn from_raw(raw_handle: isize) -> Option<Self> {
        if raw_handle == 0 {
            None
        } else {
            Some(Self(raw_handle))
        }
    }

    pub const fn raw(&self) -> isize {
        self.0
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0 as usize)
    }
}

/// Rectangle in virtual desktop coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Builds a rectangle from edge coordinates, clamping inverted edges to
    /// an empty extent.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            width: right.saturating_sub(left).max(0) as u32,
            height: bottom.saturating_sub(top).max(0) as u32,
        }
    }
}

/// A capture target: a monitor and where it sits on the desktop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScreenInfo {
    pub handle: MonitorHandle,
    pub rect: ScreenRect,
}

impl ScreenInfo {
    pub const fn new(handle: MonitorHandle, rect: ScreenRect) -> Self {
        Self { handle, rect }
    }
}

impl fmt::Display for ScreenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "monitor {} at ({}, {}) {}x{}",
            self.handle, self.rect.left, self.rect.top, self.rect.width, self.rect.height
        )
    }
}

/// True when both lists name the same screens, ignoring order.
pub fn screen_sets_match(requested: &[ScreenInfo], allocated: &[ScreenInfo]) -> bool {
    requested.len() == allocated.len()
        && requested.iter().all(|screen| allocated.contains(screen))
        && allocated.iter().all(|screen| requested.contains(screen))
}
