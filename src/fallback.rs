//! Zero-filled placeholder buffers for screens that cannot be captured.

use tracing::warn;

use crate::error::{GrabError, GrabResult};
use crate::frame::{
    BYTES_PER_PIXEL, BufferFormat, GrabbedScreen, ScreenBuffer, downscale_factor,
    downscaled_extent, rotation_swaps_axes,
};
use crate::screen::ScreenRect;

/// Rows and stride of a downscaled buffer for `rect`, laid out the way the
/// duplicated surface would be for the given rotation code.
pub(crate) fn blank_layout(rect: ScreenRect, rotation: u8) -> GrabResult<(usize, usize)> {
    let (width, height) = if rotation_swaps_axes(rotation) {
        (rect.height, rect.width)
    } else {
        (rect.width, rect.height)
    };
    let (width, height) = downscaled_extent(width, height);
    let stride = (width as usize)
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or(GrabError::BufferOverflow)?;
    Ok((height as usize, stride))
}

/// Replaces every screen's buffer with zeros of the downscaled shape.
pub(crate) fn fill_blank_buffers(screens: &mut [GrabbedScreen]) -> GrabResult<()> {
    for screen in screens {
        fill_blank(screen)?;
    }
    Ok(())
}

fn fill_blank(screen: &mut GrabbedScreen) -> GrabResult<()> {
    let (rows, stride) = blank_layout(screen.screen_info.rect, screen.rotation)?;
    let needed = rows.checked_mul(stride).ok_or(GrabError::BufferOverflow)?;

    match &mut screen.buffer {
        ScreenBuffer::Blank(bytes) if bytes.len() == needed => bytes.fill(0),
        buffer => {
            if let ScreenBuffer::Blank(bytes) = buffer {
                warn!(
                    expected = needed,
                    actual = bytes.len(),
                    screen = %screen.screen_info,
                    "unexpected fallback buffer size, reallocating"
                );
            }
            let mut bytes = Vec::new();
            bytes.try_reserve_exact(needed).map_err(|err| {
                GrabError::Platform(anyhow::anyhow!(
                    "failed to allocate {needed} byte fallback buffer: {err}"
                ))
            })?;
            bytes.resize(needed, 0);
            *buffer = ScreenBuffer::Blank(bytes);
        }
    }

    screen.format = BufferFormat::Argb;
    screen.scale = downscale_factor();
    screen.bytes_per_row = stride;
    Ok(())
}
