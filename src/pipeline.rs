//! Per-session acquisition, GPU downscale and CPU mapping.

use tracing::{trace, warn};

use crate::backend::{FrameInfo, TextureDesc};
use crate::error::{GrabError, GrabResult};
use crate::frame::{
    BufferFormat, DOWNSCALE_EXPONENT, GrabbedScreen, ScreenBuffer, downscale_factor,
    downscaled_extent, rotation_swaps_axes,
};
use crate::session::CaptureSession;

/// What one session contributed to a capture cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionFrame {
    /// A new downscaled image is mapped.
    Updated,
    /// Nothing presented since the previous acquisition.
    Unchanged,
    /// The frame had a format the engine cannot hand out.
    Dropped,
    /// No frame was pending.
    TimedOut,
}

/// Acquires and reads back the next frame of one session.
///
/// The acquired frame is released on every path once it was obtained.
pub(crate) fn grab_session(
    screen: &mut GrabbedScreen,
    session: &mut CaptureSession,
    timeout_ms: u32,
) -> GrabResult<SessionFrame> {
    let info = match session.duplication.acquire_next_frame(timeout_ms) {
        Ok(info) => info,
        Err(GrabError::Timeout) => return Ok(SessionFrame::TimedOut),
        Err(err) => return Err(err),
    };

    let result = read_back_frame(screen, session, &info);
    if let Err(err) = session.duplication.release_frame() {
        trace!(error = %err, "ReleaseFrame failed");
    }
    result
}

fn read_back_frame(
    screen: &mut GrabbedScreen,
    session: &mut CaptureSession,
    info: &FrameInfo,
) -> GrabResult<SessionFrame> {
    if info.last_present_time == 0 {
        return Ok(SessionFrame::Unchanged);
    }

    let source = info.texture;
    let rect = screen.screen_info.rect;
    let (expected_width, expected_height) = if rotation_swaps_axes(screen.rotation) {
        (rect.height, rect.width)
    } else {
        (rect.width, rect.height)
    };
    if source.width != expected_width || source.height != expected_height {
        return Err(GrabError::DimensionMismatch {
            expected_width,
            expected_height,
            actual_width: source.width,
            actual_height: source.height,
        });
    }

    let format = source.format.buffer_format();
    if format == BufferFormat::Unknown {
        warn!(
            format = ?source.format,
            output = %session.output.name,
            "unsupported desktop surface format, dropping frame"
        );
        return Ok(SessionFrame::Dropped);
    }

    // The previous mapping dies with the next staging copy.
    screen.clear_buffer();

    let (scaled_width, scaled_height) = downscaled_extent(source.width, source.height);
    let staging = TextureDesc {
        width: scaled_width,
        height: scaled_height,
        format: source.format,
    };
    session.duplication.ensure_staging_texture(staging)?;
    session.staging = Some(staging);

    if DOWNSCALE_EXPONENT > 0 {
        session
            .duplication
            .ensure_mip_chain(source, DOWNSCALE_EXPONENT + 1)?;
        session.duplication.copy_frame_to_mip_chain()?;
        session.duplication.generate_mips()?;
        session.duplication.copy_mip_to_staging(DOWNSCALE_EXPONENT)?;
    } else {
        session.duplication.copy_frame_to_staging()?;
    }

    let surface = session.duplication.map_staging()?;
    let len = (scaled_height as usize)
        .checked_mul(surface.row_pitch)
        .ok_or(GrabError::BufferOverflow)?;

    screen.buffer = ScreenBuffer::Mapped { surface, len };
    screen.bytes_per_row = surface.row_pitch;
    screen.format = format;
    screen.scale = downscale_factor();
    trace!(
        output = %session.output.name,
        width = scaled_width,
        height = scaled_height,
        pitch = surface.row_pitch,
        "mapped downscaled frame"
    );
    Ok(SessionFrame::Updated)
}
