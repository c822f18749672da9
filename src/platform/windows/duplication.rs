use anyhow::Context;
use tracing::trace;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_INVALID_CALL, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::backend::{FrameInfo, OutputDuplication, TextureDesc};
use crate::error::{GrabError, GrabResult};
use crate::frame::MappedSurface;

use super::surface;

struct StagingTexture {
    texture: ID3D11Texture2D,
    resource: ID3D11Resource,
    desc: TextureDesc,
    mapped: bool,
}

struct MipChain {
    texture: ID3D11Texture2D,
    view: ID3D11ShaderResourceView,
    desc: TextureDesc,
    levels: u32,
}

/// One `IDXGIOutputDuplication` plus the textures used to downscale and read
/// back its frames.
pub(crate) struct DxgiDuplication {
    duplication: IDXGIOutputDuplication,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    frame: Option<ID3D11Texture2D>,
    staging: Option<StagingTexture>,
    mip_chain: Option<MipChain>,
}

// Owned by exactly one thread at a time: created on the reallocation
// worker, then moved to the grabbing thread.
unsafe impl Send for DxgiDuplication {}

impl DxgiDuplication {
    pub(crate) fn new(
        duplication: IDXGIOutputDuplication,
        device: ID3D11Device,
        context: ID3D11DeviceContext,
    ) -> Self {
        Self {
            duplication,
            device,
            context,
            frame: None,
            staging: None,
            mip_chain: None,
        }
    }

    fn current_frame(&self) -> GrabResult<&ID3D11Texture2D> {
        self.frame
            .as_ref()
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("no desktop frame acquired")))
    }

    fn staging(&self) -> GrabResult<&StagingTexture> {
        self.staging
            .as_ref()
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("staging texture missing")))
    }

    fn mip_chain(&self) -> GrabResult<&MipChain> {
        self.mip_chain
            .as_ref()
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("mip chain texture missing")))
    }

    fn unmap_staging(&mut self) {
        if let Some(staging) = self.staging.as_mut().filter(|staging| staging.mapped) {
            unsafe { self.context.Unmap(&staging.resource, 0) };
            staging.mapped = false;
        }
    }
}

impl OutputDuplication for DxgiDuplication {
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> GrabResult<FrameInfo> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            let code = error.code();
            if code == DXGI_ERROR_WAIT_TIMEOUT {
                return Err(GrabError::Timeout);
            }
            if code == DXGI_ERROR_ACCESS_LOST || code == DXGI_ERROR_INVALID_CALL {
                return Err(GrabError::AccessLost);
            }
            return Err(GrabError::Platform(
                anyhow::Error::from(error).context("AcquireNextFrame failed"),
            ));
        }

        let texture = resource
            .context("AcquireNextFrame returned no desktop resource")
            .and_then(|resource| {
                resource
                    .cast::<ID3D11Texture2D>()
                    .context("failed to cast acquired IDXGIResource to ID3D11Texture2D")
            });
        let texture = match texture {
            Ok(texture) => texture,
            Err(err) => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Err(GrabError::Platform(err));
            }
        };

        let desc = surface::texture_desc(&texture);
        self.frame = Some(texture);
        Ok(FrameInfo {
            last_present_time: info.LastPresentTime,
            texture: desc,
        })
    }

    fn release_frame(&mut self) -> GrabResult<()> {
        self.frame = None;
        unsafe { self.duplication.ReleaseFrame() }
            .context("ReleaseFrame failed")
            .map_err(GrabError::Platform)
    }

    fn ensure_staging_texture(&mut self, desc: TextureDesc) -> GrabResult<()> {
        if self.staging.as_ref().is_some_and(|staging| staging.desc == desc) {
            return Ok(());
        }
        self.release_staging();

        let texture = surface::create_staging_texture(&self.device, desc)?;
        let resource = texture
            .cast::<ID3D11Resource>()
            .context("failed to cast staging texture to ID3D11Resource")
            .map_err(GrabError::Platform)?;
        trace!(width = desc.width, height = desc.height, "created staging texture");
        self.staging = Some(StagingTexture {
            texture,
            resource,
            desc,
            mapped: false,
        });
        Ok(())
    }

    fn ensure_mip_chain(&mut self, desc: TextureDesc, mip_levels: u32) -> GrabResult<()> {
        if self
            .mip_chain
            .as_ref()
            .is_some_and(|chain| chain.desc == desc && chain.levels == mip_levels)
        {
            return Ok(());
        }
        self.mip_chain = None;

        let (texture, view) = surface::create_mip_chain(&self.device, desc, mip_levels)?;
        trace!(
            width = desc.width,
            height = desc.height,
            levels = mip_levels,
            "created mip chain texture"
        );
        self.mip_chain = Some(MipChain {
            texture,
            view,
            desc,
            levels: mip_levels,
        });
        Ok(())
    }

    fn copy_frame_to_mip_chain(&mut self) -> GrabResult<()> {
        let frame = self.current_frame()?;
        let chain = self.mip_chain()?;
        unsafe {
            self.context
                .CopySubresourceRegion(&chain.texture, 0, 0, 0, 0, frame, 0, None)
        };
        Ok(())
    }

    fn generate_mips(&mut self) -> GrabResult<()> {
        let chain = self.mip_chain()?;
        unsafe { self.context.GenerateMips(&chain.view) };
        Ok(())
    }

    fn copy_mip_to_staging(&mut self, mip_level: u32) -> GrabResult<()> {
        self.unmap_staging();
        let chain = self.mip_chain()?;
        let staging = self.staging()?;
        unsafe {
            self.context.CopySubresourceRegion(
                &staging.texture,
                0,
                0,
                0,
                0,
                &chain.texture,
                mip_level,
                None,
            )
        };
        Ok(())
    }

    fn copy_frame_to_staging(&mut self) -> GrabResult<()> {
        self.unmap_staging();
        let frame = self.current_frame()?;
        let staging = self.staging()?;
        unsafe { self.context.CopyResource(&staging.texture, frame) };
        Ok(())
    }

    fn map_staging(&mut self) -> GrabResult<MappedSurface> {
        self.unmap_staging();
        let staging = self.staging()?;
        let surface = surface::map_for_read(&self.context, &staging.resource)?;
        if let Some(staging) = self.staging.as_mut() {
            staging.mapped = true;
        }
        Ok(surface)
    }

    fn release_staging(&mut self) {
        self.unmap_staging();
        self.staging = None;
    }
}

impl Drop for DxgiDuplication {
    fn drop(&mut self) {
        self.release_staging();
        if self.frame.take().is_some() {
            unsafe { self.duplication.ReleaseFrame() }.ok();
        }
    }
}
