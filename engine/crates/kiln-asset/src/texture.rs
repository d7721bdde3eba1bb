use std::sync::Arc;

use kiln_gfx::backend::{FenceCheck, GfxBackend, PixelFormat, TextureDesc};
use kiln_gfx::capabilities::GfxCapabilities;
use kiln_gfx::fence::{FenceStatus, GfxFence};
use kiln_gfx::handles::TextureId;
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

/// 由调用者直接给出的像素，代替文件
struct RawPixels {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

/// 2D 纹理
///
/// 加载分两步：解码并上传，然后等待上传的 fence。
/// 支持 pixel buffer 时经由它上传，支持 mipmap 生成时生成完整的 mip 链。
#[derive(Default)]
pub struct Texture {
    pixels: Option<RawPixels>,

    texture: Option<TextureId>,
    desc: Option<TextureDesc>,
    fence: GfxFence,
}
// new & init
impl Texture {
    /// 用内存中的像素定义纹理，`components` 为 1 到 4
    ///
    /// 数据长度与尺寸不符时返回 None
    pub fn from_pixels(width: u32, height: u32, components: u8, data: Vec<u8>) -> Option<Self> {
        let format = PixelFormat::from_components(components)?;
        if TextureDesc::new_2d(width, height, format).byte_size() != data.len() {
            return None;
        }
        Some(Self {
            pixels: Some(RawPixels {
                width,
                height,
                format,
                data,
            }),
            ..Default::default()
        })
    }
}
// getters
impl Texture {
    #[inline]
    pub fn id(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.desc.map(|d| (d.width, d.height))
    }

    pub fn components(&self) -> Option<u8> {
        self.desc.map(|d| d.format.components())
    }

    pub fn mip_levels(&self) -> Option<u32> {
        self.desc.map(|d| d.mip_levels)
    }
}
// tools
impl Texture {
    /// 解码为保留原始通道数的像素
    fn decode(ctx: &LoadContext<'_>, data: &[u8]) -> Result<(TextureDesc, Vec<u8>), LoadStatus> {
        let _span = tracy_client::span!("Texture::decode");
        let image = image::load_from_memory(data).map_err(|e| {
            ctx.report_failure(
                format!("Texture ({}) could not be decoded", ctx.name()),
                "Image Error",
                vec![e.to_string()],
            );
            LoadStatus::InvalidData
        })?;

        let (width, height) = (image.width(), image.height());
        let (format, pixels) = match image.color().channel_count() {
            1 => (PixelFormat::R8, image.into_luma8().into_raw()),
            2 => (PixelFormat::Rg8, image.into_luma_alpha8().into_raw()),
            3 => (PixelFormat::Rgb8, image.into_rgb8().into_raw()),
            _ => (PixelFormat::Rgba8, image.into_rgba8().into_raw()),
        };
        Ok((TextureDesc::new_2d(width, height, format), pixels))
    }
}

impl Resource for Texture {
    const KIND: ResourceKind = ResourceKind::Texture;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        match ctx.check_fence(&mut self.fence, FenceCheck::Normal) {
            FenceStatus::Busy => return LoadStatus::Busy,
            FenceStatus::Satisfied => {
                log::info!("Texture ({}) loaded asynchronous", ctx.name());
                return LoadStatus::Ok;
            }
            FenceStatus::Unset => {}
        }
        if self.texture.is_some() {
            return LoadStatus::InvalidCall;
        }

        let decoded;
        let (mut desc, pixels) = match &self.pixels {
            Some(raw) => (TextureDesc::new_2d(raw.width, raw.height, raw.format), raw.data.as_slice()),
            None => {
                let data = match ctx.source() {
                    Ok(data) => data,
                    Err(status) => return status,
                };
                decoded = match Self::decode(ctx, data) {
                    Ok(decoded) => decoded,
                    Err(status) => return status,
                };
                (decoded.0, decoded.1.as_slice())
            }
        };

        let gfx = ctx.gfx();
        let mipmaps = gfx.has(GfxCapabilities::MIPMAP_GENERATION);
        if mipmaps {
            desc.mip_levels = TextureDesc::full_mip_levels(desc.width, desc.height);
        }
        let texture = gfx.create_texture(&desc);
        if gfx.has(GfxCapabilities::PIXEL_BUFFER) {
            gfx.upload_texture_staged(texture, pixels);
        } else {
            gfx.upload_texture(texture, pixels);
        }
        if mipmaps {
            gfx.generate_mipmaps(texture);
        }
        self.texture = Some(texture);
        self.desc = Some(desc);

        if self.fence.create(gfx) {
            return LoadStatus::Busy;
        }
        log::info!("Texture ({}) loaded", ctx.name());
        LoadStatus::Ok
    }

    fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        let Some(texture) = self.texture.take() else {
            return LoadStatus::InvalidCall;
        };
        self.fence.delete();
        gfx.delete_texture(texture);
        self.desc = None;
        LoadStatus::Ok
    }

    fn default_path() -> Option<&'static str> {
        Some("textures/default.png")
    }
}
