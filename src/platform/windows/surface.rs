use std::ptr::NonNull;

use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ,
    D3D11_MAPPED_SUBRESOURCE, D3D11_RESOURCE_MISC_GENERATE_MIPS, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
    ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_TYPELESS, DXGI_FORMAT_B8G8R8A8_UNORM,
    DXGI_FORMAT_R8G8B8A8_TYPELESS, DXGI_FORMAT_R8G8B8A8_UINT, DXGI_FORMAT_R8G8B8A8_UNORM,
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_ROTATE90,
    DXGI_MODE_ROTATION_ROTATE180, DXGI_MODE_ROTATION_ROTATE270, DXGI_SAMPLE_DESC,
};

use crate::backend::TextureDesc;
use crate::error::{GrabError, GrabResult};
use crate::frame::{MappedSurface, OutputRotation, SurfaceFormat};

pub(crate) fn surface_format(format: DXGI_FORMAT) -> SurfaceFormat {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => SurfaceFormat::B8G8R8A8Unorm,
        DXGI_FORMAT_B8G8R8A8_TYPELESS => SurfaceFormat::B8G8R8A8Typeless,
        DXGI_FORMAT_R8G8B8A8_UNORM => SurfaceFormat::R8G8B8A8Unorm,
        DXGI_FORMAT_R8G8B8A8_UINT => SurfaceFormat::R8G8B8A8Uint,
        DXGI_FORMAT_R8G8B8A8_TYPELESS => SurfaceFormat::R8G8B8A8Typeless,
        other => SurfaceFormat::Other(other.0 as u32),
    }
}

pub(crate) fn dxgi_format(format: SurfaceFormat) -> DXGI_FORMAT {
    match format {
        SurfaceFormat::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        SurfaceFormat::B8G8R8A8Typeless => DXGI_FORMAT_B8G8R8A8_TYPELESS,
        SurfaceFormat::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        SurfaceFormat::R8G8B8A8Uint => DXGI_FORMAT_R8G8B8A8_UINT,
        SurfaceFormat::R8G8B8A8Typeless => DXGI_FORMAT_R8G8B8A8_TYPELESS,
        SurfaceFormat::Other(raw) => DXGI_FORMAT(raw as i32),
    }
}

/// Filterable format of the same copy family, used for the mip chain.
/// Typeless and integer surfaces cannot back a mip-generating view.
pub(crate) fn mip_chain_format(format: SurfaceFormat) -> DXGI_FORMAT {
    match format {
        SurfaceFormat::B8G8R8A8Unorm | SurfaceFormat::B8G8R8A8Typeless => {
            DXGI_FORMAT_B8G8R8A8_UNORM
        }
        SurfaceFormat::R8G8B8A8Unorm
        | SurfaceFormat::R8G8B8A8Uint
        | SurfaceFormat::R8G8B8A8Typeless => DXGI_FORMAT_R8G8B8A8_UNORM,
        SurfaceFormat::Other(raw) => DXGI_FORMAT(raw as i32),
    }
}

pub(crate) fn output_rotation(rotation: DXGI_MODE_ROTATION) -> OutputRotation {
    match rotation {
        DXGI_MODE_ROTATION_IDENTITY => OutputRotation::Identity,
        DXGI_MODE_ROTATION_ROTATE90 => OutputRotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => OutputRotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => OutputRotation::Rotate270,
        _ => OutputRotation::Unspecified,
    }
}

pub(crate) fn texture_desc(texture: &ID3D11Texture2D) -> TextureDesc {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    TextureDesc {
        width: desc.Width,
        height: desc.Height,
        format: surface_format(desc.Format),
    }
}

const SINGLE_SAMPLE: DXGI_SAMPLE_DESC = DXGI_SAMPLE_DESC {
    Count: 1,
    Quality: 0,
};

pub(crate) fn create_staging_texture(
    device: &ID3D11Device,
    desc: TextureDesc,
) -> GrabResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: dxgi_format(desc.format),
        SampleDesc: SINGLE_SAMPLE,
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: Default::default(),
    };
    create_texture(device, &desc, "CreateTexture2D(staging) failed")
}

/// Full-resolution render target with `mip_levels` levels and the view used
/// to generate them.
pub(crate) fn create_mip_chain(
    device: &ID3D11Device,
    desc: TextureDesc,
    mip_levels: u32,
) -> GrabResult<(ID3D11Texture2D, ID3D11ShaderResourceView)> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: mip_levels,
        ArraySize: 1,
        Format: mip_chain_format(desc.format),
        SampleDesc: SINGLE_SAMPLE,
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: Default::default(),
        MiscFlags: D3D11_RESOURCE_MISC_GENERATE_MIPS.0 as u32,
    };
    let texture = create_texture(device, &desc, "CreateTexture2D(mip chain) failed")?;

    let mut view: Option<ID3D11ShaderResourceView> = None;
    unsafe { device.CreateShaderResourceView(&texture, None, Some(&mut view)) }
        .context("CreateShaderResourceView failed")
        .map_err(GrabError::Platform)?;
    let view = view
        .context("CreateShaderResourceView did not return a view")
        .map_err(GrabError::Platform)?;
    Ok((texture, view))
}

fn create_texture(
    device: &ID3D11Device,
    desc: &D3D11_TEXTURE2D_DESC,
    create_context: &'static str,
) -> GrabResult<ID3D11Texture2D> {
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(desc, None, Some(&mut texture)) }
        .context(create_context)
        .map_err(GrabError::Platform)?;
    texture
        .context(create_context)
        .map_err(GrabError::Platform)
}

/// Maps subresource 0 of a staging texture for reading.
pub(crate) fn map_for_read(
    context: &ID3D11DeviceContext,
    resource: &ID3D11Resource,
) -> GrabResult<MappedSurface> {
    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe { context.Map(resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
        .context("ID3D11DeviceContext::Map failed")
        .map_err(GrabError::Platform)?;
    let data = NonNull::new(mapped.pData.cast::<u8>())
        .context("Map returned a null pointer")
        .map_err(GrabError::Platform)?;
    Ok(MappedSurface {
        data,
        row_pitch: mapped.RowPitch as usize,
    })
}
