use std::sync::Arc;

use ash::vk;
use strata_gfx::backend::GfxBackend;
use strata_gfx::commands::barrier::GfxBufferBarrier;
use strata_gfx::commands::command_list::GfxCommandList;
use strata_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};

use crate::context::StreamContext;
use crate::registry::{Asset, Handle};
use crate::upload::{
    OwnershipTransfer, UploadBatch, UploadError, UploadState, create_staging, log_state, register_upload,
    submit_upload,
};

/// 通用的 device local buffer
pub struct StaticBuffer {
    buffer: GfxBuffer,
}

impl Asset for StaticBuffer {
    fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_buffer(self.buffer);
    }
}

// getters
impl StaticBuffer {
    #[inline]
    pub fn buffer(&self) -> &GfxBuffer {
        &self.buffer
    }

    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer.vk_buffer(),
            offset: 0,
            range: self.buffer.size(),
        }
    }
}

/// 上传请求
pub struct BufferUploadInfo {
    pub name: String,
    pub data: Vec<u8>,
    pub usage: vk::BufferUsageFlags,
    /// graphics queue 上第一次使用该 buffer 的 stage 与 access
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl StaticBuffer {
    /// 立即返回 handle，上传在后台进行
    pub fn request(ctx: &Arc<StreamContext>, info: BufferUploadInfo) -> Handle<StaticBuffer> {
        let _span = tracy_client::span!("StaticBuffer::request");
        let handle = ctx.registry().emplace_empty::<StaticBuffer>();
        log::info!("request buffer: {}, {} bytes", info.name, info.data.len());

        ctx.spawn(move |ctx| {
            let _span = tracy_client::span!("StaticBuffer::upload");
            let name = info.name.clone();
            if let Err(e) = Self::upload(ctx, handle, info) {
                ctx.registry().fail(handle, format!("buffer {}: {}", name, e));
            }
        });
        handle
    }

    fn upload(ctx: &Arc<StreamContext>, handle: Handle<StaticBuffer>, info: BufferUploadInfo) -> Result<(), UploadError> {
        let backend = ctx.backend();
        if info.data.is_empty() {
            return Err(UploadError::BeforeSubmit(anyhow::anyhow!("empty buffer")));
        }

        let staging = create_staging(ctx, &info.name, &info.data).map_err(UploadError::BeforeSubmit)?;
        log_state(&info.name, UploadState::Staged);

        let buffer = match backend.create_buffer(&GfxBufferCreateInfo::new_device_buffer(
            info.data.len() as vk::DeviceSize,
            info.usage,
            &info.name,
        )) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(staging);
                return Err(UploadError::BeforeSubmit(e));
            }
        };

        let families = OwnershipTransfer::from_ctx(ctx);
        let release = GfxBufferBarrier::new()
            .buffer(buffer.vk_buffer(), 0, vk::WHOLE_SIZE)
            .queue_family_transfer(families.src, families.dst)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);
        let acquire = GfxBufferBarrier::new()
            .buffer(buffer.vk_buffer(), 0, vk::WHOLE_SIZE)
            .queue_family_transfer(families.src, families.dst)
            .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
            .dst_mask(info.dst_stage, info.dst_access);

        let mut transfer = GfxCommandList::new(format!("buffer:{}:transfer", info.name));
        transfer
            .cmd_copy_buffer(staging.vk_buffer(), buffer.vk_buffer(), info.data.len() as vk::DeviceSize)
            .buffer_memory_barrier(&[release]);
        let mut graphics = GfxCommandList::new(format!("buffer:{}:acquire", info.name));
        graphics.buffer_memory_barrier(&[acquire]);

        let batch = UploadBatch {
            name: info.name.clone(),
            staging: vec![staging],
            transfer,
            graphics,
            wait_stage: info.dst_stage,
            generates_mips: false,
        };
        match submit_upload(ctx, batch) {
            Ok(upload) => {
                register_upload(ctx, upload, move |ctx| ctx.registry().finalize(handle, StaticBuffer { buffer }));
                Ok(())
            }
            Err(e @ UploadError::BeforeSubmit(_)) => {
                backend.destroy_buffer(buffer);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
