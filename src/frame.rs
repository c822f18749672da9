use std::ptr::NonNull;

use crate::screen::ScreenInfo;
use crate::session::SessionId;

/// Power-of-two reduction applied to every captured frame before CPU
/// readback: 3 means 1/8 of the linear resolution in each dimension.
pub const DOWNSCALE_EXPONENT: u32 = 3;

/// Bytes per pixel of every format the engine hands out.
pub const BYTES_PER_PIXEL: usize = 4;

/// Linear scale of buffers relative to the full-resolution screen.
pub fn downscale_factor() -> f64 {
    1.0 / f64::from(1u32 << DOWNSCALE_EXPONENT)
}

/// Width and height after applying [`DOWNSCALE_EXPONENT`].
pub const fn downscaled_extent(width: u32, height: u32) -> (u32, u32) {
    (width >> DOWNSCALE_EXPONENT, height >> DOWNSCALE_EXPONENT)
}

/// Channel order of a grabbed buffer, named from the most significant byte
/// of a little-endian `u32` pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferFormat {
    /// B8G8R8A8 in memory.
    Argb,
    /// R8G8B8A8 in memory.
    Abgr,
    Unknown,
}

/// Pixel format of a duplicated desktop surface as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceFormat {
    B8G8R8A8Unorm,
    B8G8R8A8Typeless,
    R8G8B8A8Unorm,
    R8G8B8A8Uint,
    R8G8B8A8Typeless,
    /// Any other format, carrying the raw platform value for diagnostics.
    Other(u32),
}

impl SurfaceFormat {
    pub const fn buffer_format(self) -> BufferFormat {
        match self {
            Self::B8G8R8A8Unorm | Self::B8G8R8A8Typeless => BufferFormat::Argb,
            Self::R8G8B8A8Unorm | Self::R8G8B8A8Uint | Self::R8G8B8A8Typeless => {
                BufferFormat::Abgr
            }
            Self::Other(_) => BufferFormat::Unknown,
        }
    }
}

/// Physical orientation of a display output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputRotation {
    #[default]
    Unspecified,
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl OutputRotation {
    /// Quarter turns a consumer applies to bring the captured image back to
    /// desktop orientation. Runs opposite to the physical rotation.
    pub const fn compensation_code(self) -> u8 {
        match self {
            Self::Rotate90 => 3,
            Self::Rotate180 => 2,
            Self::Rotate270 => 1,
            Self::Unspecified | Self::Identity => 0,
        }
    }
}

/// Whether a rotation code turns the surface sideways relative to the
/// desktop rectangle.
pub const fn rotation_swaps_axes(rotation: u8) -> bool {
    rotation % 2 == 1
}

/// CPU-visible view of a mapped staging texture.
#[derive(Clone, Copy, Debug)]
pub struct MappedSurface {
    pub data: NonNull<u8>,
    pub row_pitch: usize,
}

// The pointer targets GPU staging memory owned by a capture session; the
// engine only dereferences it from the thread that currently owns the
// session.
unsafe impl Send for MappedSurface {}

#[derive(Debug, Default)]
pub(crate) enum ScreenBuffer {
    #[default]
    Empty,
    /// Borrowed from the session's mapped staging texture.
    Mapped { surface: MappedSurface, len: usize },
    /// Zero-filled placeholder owned by the engine.
    Blank(Vec<u8>),
}

/// Capture result for one screen.
///
/// Buffer contents are only valid until the next `grab_screens` or
/// `reallocate` call on the owning grabber, which the borrow on the grabber
/// enforces.
#[derive(Debug)]
pub struct GrabbedScreen {
    pub(crate) screen_info: ScreenInfo,
    pub(crate) buffer: ScreenBuffer,
    pub(crate) format: BufferFormat,
    pub(crate) scale: f64,
    pub(crate) rotation: u8,
    pub(crate) bytes_per_row: usize,
    pub(crate) session: Option<SessionId>,
}

impl GrabbedScreen {
    pub(crate) fn new(screen_info: ScreenInfo, rotation: u8, session: Option<SessionId>) -> Self {
        Self {
            screen_info,
            buffer: ScreenBuffer::Empty,
            format: BufferFormat::Unknown,
            scale: 1.0,
            rotation,
            bytes_per_row: 0,
            session,
        }
    }

    pub fn screen_info(&self) -> &ScreenInfo {
        &self.screen_info
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Compensating quarter turns, see [`OutputRotation::compensation_code`].
    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn buffer_len(&self) -> usize {
        match &self.buffer {
            ScreenBuffer::Empty => 0,
            ScreenBuffer::Mapped { len, .. } => *len,
            ScreenBuffer::Blank(bytes) => bytes.len(),
        }
    }

    pub fn has_buffer(&self) -> bool {
        !matches!(self.buffer, ScreenBuffer::Empty)
    }

    /// Rows in the buffer as implied by its length and stride.
    pub fn rows(&self) -> usize {
        if self.bytes_per_row == 0 {
            0
        } else {
            self.buffer_len() / self.bytes_per_row
        }
    }

    /// Pixel bytes, or `None` while no frame has been produced.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.buffer {
            ScreenBuffer::Empty => None,
            // SAFETY: the engine resets the buffer to `Empty` before the
            // staging texture behind `surface` is unmapped or released, and
            // both only happen through `&mut` access to the grabber.
            ScreenBuffer::Mapped { surface, len } => {
                Some(unsafe { std::slice::from_raw_parts(surface.data.as_ptr(), *len) })
            }
            ScreenBuffer::Blank(bytes) => Some(bytes),
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    pub(crate) fn clear_buffer(&mut self) {
        self.buffer = ScreenBuffer::Empty;
    }
}
