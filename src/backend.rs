//! Contract of the platform GPU capture API.
//!
//! The engine drives adapters, devices and duplications only through these
//! traits. `platform::windows` implements them on top of DXGI and Direct3D 11;
//! unit tests implement them with scripted mocks.

use std::sync::Arc;

use crate::error::GrabResult;
use crate::frame::{MappedSurface, OutputRotation, SurfaceFormat};
use crate::screen::{MonitorHandle, ScreenRect};

/// One display output of an adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDesc {
    /// Position in the adapter's output enumeration.
    pub index: u32,
    pub name: String,
    /// `None` while the platform has not assigned a monitor yet.
    pub monitor: Option<MonitorHandle>,
    pub rect: ScreenRect,
    pub rotation: OutputRotation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

/// Metadata of an acquired desktop frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Zero when nothing was presented since the previous acquisition.
    pub last_present_time: i64,
    pub texture: TextureDesc,
}

/// A live duplication of one output together with the device, context and
/// textures used to read it back.
///
/// Between a successful [`acquire_next_frame`](Self::acquire_next_frame) and
/// [`release_frame`](Self::release_frame) the implementation holds the
/// acquired surface as the "current frame".
pub trait OutputDuplication: Send {
    /// Returns [`GrabError::Timeout`](crate::error::GrabError::Timeout) when no
    /// frame is pending and [`GrabError::AccessLost`](crate::error::GrabError::AccessLost)
    /// when the duplication must be recreated.
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> GrabResult<FrameInfo>;

    fn release_frame(&mut self) -> GrabResult<()>;

    /// Creates the CPU-readable staging texture, keeping the existing one
    /// when `desc` is unchanged.
    fn ensure_staging_texture(&mut self, desc: TextureDesc) -> GrabResult<()>;

    /// Creates the full-resolution render target with `mip_levels` levels,
    /// keeping the existing one when nothing changed.
    fn ensure_mip_chain(&mut self, desc: TextureDesc, mip_levels: u32) -> GrabResult<()>;

    /// Copies the current frame into level 0 of the mip chain.
    fn copy_frame_to_mip_chain(&mut self) -> GrabResult<()>;

    fn generate_mips(&mut self) -> GrabResult<()>;

    /// Copies one mip level into the staging texture, unmapping it first.
    fn copy_mip_to_staging(&mut self, mip_level: u32) -> GrabResult<()>;

    /// Copies the current frame into the staging texture, unmapping it first.
    fn copy_frame_to_staging(&mut self) -> GrabResult<()>;

    /// Maps the staging texture for reading. The mapping stays valid until
    /// the next staging copy or [`release_staging`](Self::release_staging).
    fn map_staging(&mut self) -> GrabResult<MappedSurface>;

    /// Unmaps and drops the staging texture.
    fn release_staging(&mut self);
}

/// A GPU device and immediate context created on one adapter.
pub trait CaptureDevice: Send {
    /// Fails with [`GrabError::AccessDenied`](crate::error::GrabError::AccessDenied),
    /// [`GrabError::Unsupported`](crate::error::GrabError::Unsupported) or
    /// [`GrabError::ModeChangeInProgress`](crate::error::GrabError::ModeChangeInProgress)
    /// for the conditions the engine handles specially.
    fn duplicate_output(&self, output: &OutputDesc) -> GrabResult<Box<dyn OutputDuplication>>;
}

pub trait GraphicsAdapter: Send + Sync {
    fn description(&self) -> String;

    fn outputs(&self) -> GrabResult<Vec<OutputDesc>>;

    fn create_device(&self) -> GrabResult<Box<dyn CaptureDevice>>;
}

pub trait DuplicationBackend: Send + Sync {
    fn enumerate_adapters(&self) -> GrabResult<Vec<Arc<dyn GraphicsAdapter>>>;

    /// Associates the calling thread with the desktop currently receiving
    /// user input. Fails with
    /// [`GrabError::AccessDenied`](crate::error::GrabError::AccessDenied) on a
    /// secure desktop.
    fn switch_to_input_desktop(&self) -> GrabResult<()>;
}

/// Backend for the current platform.
pub fn default_backend() -> GrabResult<Arc<dyn DuplicationBackend>> {
    crate::platform::build_backend()
}
