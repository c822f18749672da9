use anyhow::{Context, Result};
use tracing::debug;
use windows::Win32::Foundation::{E_ACCESSDENIED, E_NOTIMPL};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11DeviceContext,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_MODE_CHANGE_IN_PROGRESS, DXGI_ERROR_UNSUPPORTED, IDXGIAdapter, IDXGIOutput1,
};
use windows::core::Interface;

use crate::backend::{CaptureDevice, OutputDesc, OutputDuplication};
use crate::error::{GrabError, GrabResult};

use super::duplication::DxgiDuplication;

/// Create a D3D11 device on the given adapter.
///
/// The device is created on the reallocation worker and then driven from
/// the grabbing thread, one thread at a time, so the default (locking)
/// device flags are kept.
pub(crate) fn create_d3d11_device_for_adapter(
    adapter: &IDXGIAdapter,
) -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    unsafe {
        D3D11CreateDevice(
            adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")?;

    let device = device.context("D3D11CreateDevice did not return a device")?;
    let context = context.context("D3D11CreateDevice did not return a device context")?;
    Ok((device, context))
}

pub(crate) struct DxgiDevice {
    adapter: IDXGIAdapter,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

// D3D11 devices are free-threaded; the immediate context is only used by
// whichever thread currently owns the device.
unsafe impl Send for DxgiDevice {}

impl DxgiDevice {
    pub(crate) fn new(adapter: IDXGIAdapter) -> GrabResult<Self> {
        let (device, context) =
            create_d3d11_device_for_adapter(&adapter).map_err(GrabError::Platform)?;
        Ok(Self {
            adapter,
            device,
            context,
        })
    }
}

impl CaptureDevice for DxgiDevice {
    fn duplicate_output(&self, output: &OutputDesc) -> GrabResult<Box<dyn OutputDuplication>> {
        let dxgi_output = unsafe { self.adapter.EnumOutputs(output.index) }
            .with_context(|| format!("EnumOutputs({}) failed", output.index))
            .map_err(GrabError::Platform)?;
        let output1: IDXGIOutput1 = dxgi_output
            .cast()
            .context("failed to query IDXGIOutput1")
            .map_err(GrabError::Platform)?;

        let duplication =
            unsafe { output1.DuplicateOutput(&self.device) }.map_err(duplicate_output_error)?;
        debug!(output = %output.name, "created output duplication");

        Ok(Box::new(DxgiDuplication::new(
            duplication,
            self.device.clone(),
            self.context.clone(),
        )))
    }
}

fn duplicate_output_error(error: windows::core::Error) -> GrabError {
    let code = error.code();
    if code == E_ACCESSDENIED {
        GrabError::AccessDenied
    } else if code == E_NOTIMPL || code == DXGI_ERROR_UNSUPPORTED {
        GrabError::Unsupported(format!("DuplicateOutput returned {code:?}"))
    } else if code == DXGI_ERROR_MODE_CHANGE_IN_PROGRESS {
        GrabError::ModeChangeInProgress
    } else {
        GrabError::Platform(anyhow::Error::from(error).context("DuplicateOutput failed"))
    }
}
