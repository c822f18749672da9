//! Per-monitor screen grabbing through DXGI desktop duplication.
//!
//! Frames are downscaled on the GPU by a fixed power of two and exposed as
//! mapped CPU buffers, one per requested screen. When the system refuses
//! capture (secure desktop, protected content) the grabber serves zeroed
//! buffers of the same shape and retries on a back-off.

pub mod backend;
pub mod catalog;
pub(crate) mod env_config;
pub mod error;
pub(crate) mod fallback;
pub mod frame;
pub mod grabber;
pub(crate) mod pipeline;
mod platform;
pub mod screen;
pub mod session;
pub mod state;
pub mod widget;
pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{GrabError, GrabErrorClass, GrabResult, GrabStatus};
pub use frame::{BufferFormat, GrabbedScreen, OutputRotation};
pub use grabber::{
    DuplGrabber, DuplGrabberBuilder, GrabberConfig, ReallocationOutcome, SessionChange,
};
pub use screen::{MonitorHandle, ScreenInfo, ScreenRect};
pub use session::SessionId;
pub use state::{DeniedKind, EngineState};
pub use widget::{MonitorLocator, WindowId, foreground_window};
