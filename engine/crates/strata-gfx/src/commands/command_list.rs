use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxDependency, GfxImageBarrier};

/// 以数据形式保存的一条命令
///
/// backend 在提交时才将其翻译为真正的 Vulkan 命令，因此命令列表可以在任意线程中构建
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    /// 将 buffer 复制到 image 的某个 mip level，image 需要处于 TRANSFER_DST_OPTIMAL
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        width: u32,
        height: u32,
        aspect_mask: vk::ImageAspectFlags,
        mip_level: u32,
    },
    /// 一次 barrier 调用，录制为一次 `cmd_pipeline_barrier2`
    Barrier(GfxDependency),
    /// 同一个 image 的两个 mip level 之间的 blit，src 为 TRANSFER_SRC，dst 为 TRANSFER_DST
    BlitMip {
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        src_mip_level: u32,
        src_extent: [u32; 2],
        dst_mip_level: u32,
        dst_extent: [u32; 2],
    },
}

/// 一段待提交的命令
///
/// 对应一个 one-time-submit 的 command buffer
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GfxCommandList {
    label: String,
    commands: Vec<GfxCommand>,
}

// new & init
impl GfxCommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }
}

// getters
impl GfxCommandList {
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    /// 按录制顺序排列的所有 dependency
    pub fn dependencies(&self) -> impl Iterator<Item = &GfxDependency> {
        self.commands.iter().filter_map(|command| match command {
            GfxCommand::Barrier(dependency) => Some(dependency),
            _ => None,
        })
    }
}

// 录制命令
impl GfxCommandList {
    #[inline]
    pub fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> &mut Self {
        self.commands.push(GfxCommand::CopyBuffer { src, dst, size });
        self
    }

    #[inline]
    pub fn cmd_copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
        aspect_mask: vk::ImageAspectFlags,
    ) -> &mut Self {
        self.commands.push(GfxCommand::CopyBufferToImage {
            src,
            dst,
            width: extent.width,
            height: extent.height,
            aspect_mask,
            mip_level: 0,
        });
        self
    }

    /// 每次调用对应一个独立的 dependency，调用之间保持先后顺序
    pub fn buffer_memory_barrier(&mut self, barriers: &[GfxBufferBarrier]) -> &mut Self {
        self.push_dependency(GfxDependency::buffers(barriers))
    }

    /// 每次调用对应一个独立的 dependency，调用之间保持先后顺序
    pub fn image_memory_barrier(&mut self, barriers: &[GfxImageBarrier]) -> &mut Self {
        self.push_dependency(GfxDependency::images(barriers))
    }

    fn push_dependency(&mut self, dependency: GfxDependency) -> &mut Self {
        debug_assert!(
            !dependency.has_overlap(),
            "{}: barriers in one dependency touch the same subresource",
            self.label
        );
        if !dependency.buffer_barriers.is_empty() || !dependency.image_barriers.is_empty() {
            self.commands.push(GfxCommand::Barrier(dependency));
        }
        self
    }

    /// 将 `src_mip_level` 缩小一半 blit 到下一个 level，尺寸最小为 1
    pub fn cmd_blit_mip(
        &mut self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        src_mip_level: u32,
        src_extent: [u32; 2],
    ) -> &mut Self {
        let dst_extent = [(src_extent[0] / 2).max(1), (src_extent[1] / 2).max(1)];
        self.commands.push(GfxCommand::BlitMip {
            image,
            aspect_mask,
            src_mip_level,
            src_extent,
            dst_mip_level: src_mip_level + 1,
            dst_extent,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    #[test]
    fn test_blit_mip_halves_extent() {
        let mut cmd = GfxCommandList::new("blit");
        cmd.cmd_blit_mip(vk::Image::null(), vk::ImageAspectFlags::COLOR, 3, [5, 1]);

        match &cmd.commands()[0] {
            GfxCommand::BlitMip {
                dst_mip_level,
                dst_extent,
                ..
            } => {
                assert_eq!(*dst_mip_level, 4);
                assert_eq!(*dst_extent, [2, 1]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_each_barrier_call_is_one_dependency() {
        let image = vk::Image::from_raw(1);
        let level = |base| {
            GfxImageBarrier::new().image(image).image_aspect_flag(vk::ImageAspectFlags::COLOR).mip_range(base, 1)
        };

        let mut cmd = GfxCommandList::new("deps");
        cmd.image_memory_barrier(&[level(0), level(1)])
            .image_memory_barrier(&[level(0)])
            .buffer_memory_barrier(&[])
            .cmd_blit_mip(image, vk::ImageAspectFlags::COLOR, 0, [2, 2])
            .buffer_memory_barrier(&[GfxBufferBarrier::new().buffer(vk::Buffer::from_raw(2), 0, vk::WHOLE_SIZE)]);

        let dependencies = cmd.dependencies().collect::<Vec<_>>();
        assert_eq!(dependencies.len(), 3);
        assert_eq!(dependencies[0].image_barriers, vec![level(0), level(1)]);
        assert_eq!(dependencies[1].image_barriers, vec![level(0)]);
        assert_eq!(dependencies[2].buffer_barriers.len(), 1);
        assert_eq!(cmd.commands().len(), 4);
    }

    #[test]
    #[should_panic(expected = "same subresource")]
    #[cfg(debug_assertions)]
    fn test_overlapping_barriers_rejected() {
        let barrier = GfxImageBarrier::new().image(vk::Image::from_raw(1)).image_aspect_flag(vk::ImageAspectFlags::COLOR);
        GfxCommandList::new("overlap").image_memory_barrier(&[barrier.mip_range(0, 3), barrier.mip_range(2, 1)]);
    }
}
