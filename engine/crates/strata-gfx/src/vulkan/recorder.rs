use ash::vk;

use crate::commands::command_list::{GfxCommand, GfxCommandList};

/// 将 `GfxCommandList` 翻译为 Vulkan 命令
///
/// 每个 `GfxCommand::Barrier` 对应一次 `cmd_pipeline_barrier2`，相邻的 barrier 不会合并
pub(super) struct GfxCommandRecorder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> GfxCommandRecorder<'a> {
    pub(super) fn new(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }

    /// # Safety
    /// command buffer 处于 recording 状态，且所属的 command pool 已被外部同步
    pub(super) unsafe fn record(self, commands: &GfxCommandList) {
        let _span = tracy_client::span!("GfxCommandRecorder::record");
        for command in commands.commands() {
            unsafe { self.record_command(command) };
        }
    }

    unsafe fn record_command(&self, command: &GfxCommand) {
        match *command {
            GfxCommand::CopyBuffer { src, dst, size } => unsafe {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                self.device.cmd_copy_buffer(self.command_buffer, src, dst, std::slice::from_ref(&region));
            },
            GfxCommand::CopyBufferToImage {
                src,
                dst,
                width,
                height,
                aspect_mask,
                mip_level,
            } => unsafe {
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask,
                        mip_level,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D { width, height, depth: 1 },
                };
                self.device.cmd_copy_buffer_to_image(
                    self.command_buffer,
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
            },
            GfxCommand::BlitMip {
                image,
                aspect_mask,
                src_mip_level,
                src_extent,
                dst_mip_level,
                dst_extent,
            } => unsafe {
                let subresource = |mip_level| vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                let offsets = |extent: [u32; 2]| {
                    [
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: extent[0] as i32,
                            y: extent[1] as i32,
                            z: 1,
                        },
                    ]
                };
                let region = vk::ImageBlit {
                    src_subresource: subresource(src_mip_level),
                    src_offsets: offsets(src_extent),
                    dst_subresource: subresource(dst_mip_level),
                    dst_offsets: offsets(dst_extent),
                };
                self.device.cmd_blit_image(
                    self.command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                    vk::Filter::LINEAR,
                );
            },
            GfxCommand::Barrier(ref dependency) => unsafe {
                let (buffer_barriers, image_barriers) = dependency.to_vk();
                let dependency_info = vk::DependencyInfo::default()
                    .buffer_memory_barriers(&buffer_barriers)
                    .image_memory_barriers(&image_barriers);
                self.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
            },
        }
    }
}
