use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, ensure};
use ash::vk;
use strata_gfx::backend::GfxBackend;
use strata_gfx::commands::barrier::GfxImageBarrier;
use strata_gfx::commands::command_list::GfxCommandList;
use strata_gfx::resources::image::{GfxImage, GfxImageCreateInfo};

use crate::context::StreamContext;
use crate::registry::{Asset, Handle};
use crate::upload::file_view::FileView;
use crate::upload::{
    OwnershipTransfer, UploadBatch, UploadError, UploadState, create_staging, log_state, register_upload,
    submit_upload,
};

/// 颜色贴图使用 sRGB，法线、高光等数据贴图使用 UNORM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureColorSpace {
    Srgb,
    Linear,
}

impl TextureColorSpace {
    #[inline]
    pub fn format(self) -> vk::Format {
        match self {
            TextureColorSpace::Srgb => vk::Format::R8G8B8A8_SRGB,
            TextureColorSpace::Linear => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// 已经解码的 RGBA8 像素
#[derive(Debug, Clone)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            pixels,
        }
    }

    /// 通过 mmap 读取文件，交给 image crate 解码并转换为 RGBA8
    pub fn decode_file(path: &Path) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("TextureData::decode_file");
        let file = FileView::open(path)?;
        let image = image::load_from_memory(&file)
            .with_context(|| format!("解码图片失败: {:?}", path))?
            .into_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self::new(path.to_string_lossy(), width, height, image.into_raw()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.width > 0 && self.height > 0, "texture {} has zero extent", self.name);
        ensure!(
            self.pixels.len() == self.width as usize * self.height as usize * 4,
            "texture {}: expected {} bytes of RGBA8, got {}",
            self.name,
            self.width as usize * self.height as usize * 4,
            self.pixels.len()
        );
        Ok(())
    }
}

pub enum TextureSource {
    File(PathBuf),
    Pixels(TextureData),
}

impl TextureSource {
    fn name(&self) -> String {
        match self {
            TextureSource::File(path) => path.to_string_lossy().into_owned(),
            TextureSource::Pixels(data) => data.name.clone(),
        }
    }

    fn into_data(self) -> anyhow::Result<TextureData> {
        let data = match self {
            TextureSource::File(path) => TextureData::decode_file(&path)?,
            TextureSource::Pixels(data) => data,
        };
        data.validate()?;
        Ok(data)
    }
}

/// 采样用的 2D texture，ready 之后处于 `SHADER_READ_ONLY_OPTIMAL`
pub struct StaticTexture {
    image: GfxImage,
}

impl Asset for StaticTexture {
    fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_image(self.image);
    }
}

// getters
impl StaticTexture {
    #[inline]
    pub fn image(&self) -> &GfxImage {
        &self.image
    }

    #[inline]
    pub fn descriptor_info(&self, sampler: vk::Sampler) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler,
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

// request
impl StaticTexture {
    /// 同一个路径（以及相同的颜色空间）只加载一次
    pub fn request_file(
        ctx: &Arc<StreamContext>,
        path: impl AsRef<Path>,
        color_space: TextureColorSpace,
    ) -> Handle<StaticTexture> {
        let _span = tracy_client::span!("StaticTexture::request_file");
        let path = path.as_ref().to_path_buf();

        let mut cache = ctx.texture_cache().lock().unwrap();
        if let Some(handle) = cache.get(&(path.clone(), color_space)) {
            log::debug!("texture cache hit: {:?}", path);
            return *handle;
        }
        let handle = ctx.registry().emplace_empty::<StaticTexture>();
        cache.insert((path.clone(), color_space), handle);
        drop(cache);

        log::info!("request texture: {:?}", path);
        Self::upload_into(ctx, handle, TextureSource::File(path), color_space);
        handle
    }

    pub fn request_pixels(
        ctx: &Arc<StreamContext>,
        data: TextureData,
        color_space: TextureColorSpace,
    ) -> Handle<StaticTexture> {
        let _span = tracy_client::span!("StaticTexture::request_pixels");
        let handle = ctx.registry().emplace_empty::<StaticTexture>();
        log::info!("request texture: {}, {}x{}", data.name, data.width, data.height);
        Self::upload_into(ctx, handle, TextureSource::Pixels(data), color_space);
        handle
    }

    /// 在后台解码并上传到一个已经预留的 slot
    pub(crate) fn upload_into(
        ctx: &Arc<StreamContext>,
        handle: Handle<StaticTexture>,
        source: TextureSource,
        color_space: TextureColorSpace,
    ) {
        ctx.spawn(move |ctx| {
            let _span = tracy_client::span!("StaticTexture::upload");
            let name = source.name();
            let result = source
                .into_data()
                .map_err(UploadError::BeforeSubmit)
                .and_then(|data| Self::upload(ctx, handle, data, color_space));
            if let Err(e) = result {
                ctx.registry().fail(handle, format!("texture {}: {}", name, e));
            }
        });
    }
}

// upload
impl StaticTexture {
    fn upload(
        ctx: &Arc<StreamContext>,
        handle: Handle<StaticTexture>,
        data: TextureData,
        color_space: TextureColorSpace,
    ) -> Result<(), UploadError> {
        let backend = ctx.backend();
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let mip_levels =
            if ctx.config().generate_mips { GfxImageCreateInfo::full_mip_levels(extent) } else { 1 };

        let staging = create_staging(ctx, &data.name, &data.pixels).map_err(UploadError::BeforeSubmit)?;
        log_state(&data.name, UploadState::Staged);

        let image_info = GfxImageCreateInfo::new_image_2d_info(
            extent,
            color_space.format(),
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            &data.name,
        )
        .mip_levels(mip_levels);
        let image = match backend.create_image(&image_info) {
            Ok(image) => image,
            Err(e) => {
                backend.destroy_buffer(staging);
                return Err(UploadError::BeforeSubmit(e));
            }
        };

        let (transfer, graphics) =
            Self::record(&data.name, &image, staging.vk_buffer(), OwnershipTransfer::from_ctx(ctx));
        let wait_stage = if mip_levels > 1 {
            vk::PipelineStageFlags2::TRANSFER
        } else {
            vk::PipelineStageFlags2::FRAGMENT_SHADER
        };
        let batch = UploadBatch {
            name: data.name.clone(),
            staging: vec![staging],
            transfer,
            graphics,
            wait_stage,
            generates_mips: mip_levels > 1,
        };
        match submit_upload(ctx, batch) {
            Ok(upload) => {
                register_upload(ctx, upload, move |ctx| ctx.registry().finalize(handle, StaticTexture { image }));
                Ok(())
            }
            Err(e @ UploadError::BeforeSubmit(_)) => {
                backend.destroy_image(image);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// transfer 端：layout 转换、复制到 mip 0、release
    ///
    /// graphics 端：acquire，然后逐级 blit 生成 mip，最后所有 level 转换为 `SHADER_READ_ONLY_OPTIMAL`
///
/// 每次 barrier 调用是一个独立的 dependency，同一个调用中的 barrier 不作用于同一个 level
    fn record(
        name: &str,
        image: &GfxImage,
        staging: vk::Buffer,
        families: OwnershipTransfer,
    ) -> (GfxCommandList, GfxCommandList) {
        let mip_levels = image.mip_levels();
        let has_mips = mip_levels > 1;
        let barrier = || GfxImageBarrier::new().image(image.handle()).image_aspect_flag(image.aspect());

        // 没有 mip 时直接在 ownership transfer 中转换到最终 layout
        let (transfer_layout, acquire_mask) = if has_mips {
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE),
            )
        } else {
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                (vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ),
            )
        };

        let mut transfer = GfxCommandList::new(format!("texture:{}:transfer", name));
        transfer
            .image_memory_barrier(&[barrier()
                .mip_range(0, mip_levels)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)])
            .cmd_copy_buffer_to_image(staging, image.handle(), image.extent(), image.aspect())
            .image_memory_barrier(&[barrier()
                .mip_range(0, mip_levels)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, transfer_layout)
                .queue_family_transfer(families.src, families.dst)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)]);

        let mut graphics = GfxCommandList::new(format!("texture:{}:acquire", name));
        graphics.image_memory_barrier(&[barrier()
            .mip_range(0, mip_levels)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, transfer_layout)
            .queue_family_transfer(families.src, families.dst)
            .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
            .dst_mask(acquire_mask.0, acquire_mask.1)]);
        if !has_mips {
            return (transfer, graphics);
        }

        let to_blit_src = |level: u32| {
            barrier()
                .mip_range(level, 1)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
        };
        let mut extent = [image.width(), image.height()];
        for level in 1..mip_levels {
            graphics
                .image_memory_barrier(&[to_blit_src(level - 1)])
                .cmd_blit_mip(image.handle(), image.aspect(), level - 1, extent);
            extent = [(extent[0] / 2).max(1), (extent[1] / 2).max(1)];
        }
        // 前面的 level 都是 blit 的 src，最后一级只作为 dst 写入过
        graphics.image_memory_barrier(&[
            barrier()
                .mip_range(0, mip_levels - 1)
                .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ),
            barrier()
                .mip_range(mip_levels - 1, 1)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ),
        ]);
        (transfer, graphics)
    }
}

// descriptor
impl StaticTexture {
    /// 所有 texture slot 的 image info，按 handle 顺序排列
    ///
    /// 未就绪与失败的 slot 使用 fallback texture；在同一把锁中完成
    pub fn descriptor_infos(ctx: &StreamContext, sampler: vk::Sampler) -> Vec<vk::DescriptorImageInfo> {
        let _span = tracy_client::span!("StaticTexture::descriptor_infos");
        let storage = ctx.registry().storage::<StaticTexture>();
        let guard = storage.lock();
        let Some(fallback) = guard.from_handle(ctx.fallback_texture()) else {
            log::error!("fallback texture is not ready");
            return Vec::new();
        };

        guard
            .iter()
            .map(|(handle, _)| guard.get_or(handle, fallback).descriptor_info(sampler))
            .collect()
    }
}
