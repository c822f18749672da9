use std::sync::Arc;

use anyhow::Context;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIAdapter1, IDXGIFactory1,
};
use windows::core::Interface;

use crate::backend::{CaptureDevice, GraphicsAdapter, OutputDesc};
use crate::error::{GrabError, GrabResult};
use crate::screen::{MonitorHandle, ScreenRect};

use super::d3d11::DxgiDevice;
use super::surface;

pub(crate) struct DxgiAdapter {
    adapter: IDXGIAdapter,
    description: String,
}

// DXGI factories and adapters are free-threaded.
unsafe impl Send for DxgiAdapter {}
unsafe impl Sync for DxgiAdapter {}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

pub(crate) fn enumerate_adapters() -> GrabResult<Vec<Arc<dyn GraphicsAdapter>>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(GrabError::Platform)?;

    let mut adapters: Vec<Arc<dyn GraphicsAdapter>> = Vec::new();
    let mut adapter_idx = 0u32;
    loop {
        let adapter1: IDXGIAdapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(a) => a,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(GrabError::Platform(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter_desc = unsafe { adapter1.GetDesc1() }
            .context("IDXGIAdapter1::GetDesc1 failed")
            .map_err(GrabError::Platform)?;
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(GrabError::Platform)?;

        adapters.push(Arc::new(DxgiAdapter {
            adapter,
            description: utf16z_to_string(&adapter_desc.Description),
        }));
        adapter_idx += 1;
    }

    Ok(adapters)
}

impl GraphicsAdapter for DxgiAdapter {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn outputs(&self) -> GrabResult<Vec<OutputDesc>> {
        let mut outputs = Vec::new();
        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { self.adapter.EnumOutputs(output_idx) } {
                Ok(o) => o,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(GrabError::Platform(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on {} failed", self.description),
                    )));
                }
            };

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(GrabError::Platform)?;
            let coords = desc.DesktopCoordinates;
            outputs.push(OutputDesc {
                index: output_idx,
                name: utf16z_to_string(&desc.DeviceName),
                monitor: MonitorHandle::from_raw(desc.Monitor.0 as isize),
                rect: ScreenRect::from_edges(coords.left, coords.top, coords.right, coords.bottom),
                rotation: surface::output_rotation(desc.Rotation),
            });

            output_idx += 1;
        }
        Ok(outputs)
    }

    fn create_device(&self) -> GrabResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(DxgiDevice::new(self.adapter.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_stop_at_the_terminator() {
        let mut raw = [0u16; 32];
        for (slot, ch) in raw.iter_mut().zip(r"\\.\DISPLAY2".encode_utf16()) {
            *slot = ch;
        }
        assert_eq!(utf16z_to_string(&raw), r"\\.\DISPLAY2");
        assert_eq!(utf16z_to_string(&[0x41, 0x42]), "AB");
    }
}
