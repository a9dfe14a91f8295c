use ash::vk;

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl Default for GfxBarrierMask {
    fn default() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
        }
    }
}

/// 队列所有权转移的两端
///
/// 两个 queue family 相同时不需要转移，barrier 中使用 `QUEUE_FAMILY_IGNORED`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxQueueFamilyTransfer {
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
}

impl Default for GfxQueueFamilyTransfer {
    fn default() -> Self {
        Self {
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

impl GfxQueueFamilyTransfer {
    pub fn new(src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        if src_queue_family_index == dst_queue_family_index {
            Self::default()
        } else {
            Self {
                src_queue_family_index,
                dst_queue_family_index,
            }
        }
    }

    /// 是否真的发生了所有权转移
    #[inline]
    pub fn is_transfer(&self) -> bool {
        self.src_queue_family_index != self.dst_queue_family_index
    }
}

/// 便捷创建 image memory barrier 的结构体
///
/// 以数据的形式保存，提交时才转换为 `vk::ImageMemoryBarrier2`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxImageBarrier {
    pub image: vk::Image,
    pub mask: GfxBarrierMask,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub queue_family: GfxQueueFamilyTransfer,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            image: vk::Image::null(),
            mask: GfxBarrierMask::default(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            queue_family: GfxQueueFamilyTransfer::default(),
            aspect_mask: vk::ImageAspectFlags::empty(),
            base_mip_level: 0,
            level_count: 1,
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .image(self.image)
            .src_stage_mask(self.mask.src_stage)
            .src_access_mask(self.mask.src_access)
            .dst_stage_mask(self.mask.dst_stage)
            .dst_access_mask(self.mask.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(self.queue_family.src_queue_family_index)
            .dst_queue_family_index(self.queue_family.dst_queue_family_index)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect_mask,
                base_mip_level: self.base_mip_level,
                level_count: self.level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.queue_family = GfxQueueFamilyTransfer::new(src_queue_family_index, dst_queue_family_index);
        self
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.mask.src_stage = src_stage_mask;
        self.mask.src_access = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.mask.dst_stage = dst_stage_mask;
        self.mask.dst_access = dst_access_mask;
        self
    }

    /// builder
    /// layer 使用默认值
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn mip_range(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.base_mip_level = base_mip_level;
        self.level_count = level_count;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.image = image;
        self
    }

    /// 是否与另一个 barrier 作用于同一个 subresource
    pub fn overlaps(&self, other: &GfxImageBarrier) -> bool {
        self.image == other.image
            && self.aspect_mask.intersects(other.aspect_mask)
            && self.base_mip_level < other.base_mip_level + other.level_count
            && other.base_mip_level < self.base_mip_level + self.level_count
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub mask: GfxBarrierMask,
    pub queue_family: GfxQueueFamilyTransfer,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            mask: GfxBarrierMask::default(),
            queue_family: GfxQueueFamilyTransfer::default(),
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
            .src_stage_mask(self.mask.src_stage)
            .src_access_mask(self.mask.src_access)
            .dst_stage_mask(self.mask.dst_stage)
            .dst_access_mask(self.mask.dst_access)
            .src_queue_family_index(self.queue_family.src_queue_family_index)
            .dst_queue_family_index(self.queue_family.dst_queue_family_index)
    }

    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.queue_family = GfxQueueFamilyTransfer::new(src_queue_family_index, dst_queue_family_index);
        self
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.mask.src_stage = src_stage_mask;
        self.mask.src_access = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.mask.dst_stage = dst_stage_mask;
        self.mask.dst_access = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.buffer = buffer;
        self.offset = offset;
        self.size = size;
        self
    }

    /// `WHOLE_SIZE` 视为一直延伸到 buffer 末尾
    pub fn overlaps(&self, other: &GfxBufferBarrier) -> bool {
        let end = |b: &GfxBufferBarrier| if b.size == vk::WHOLE_SIZE { u64::MAX } else { b.offset + b.size };
        self.buffer == other.buffer && self.offset < end(other) && other.offset < end(self)
    }
}

/// 一次 `cmd_pipeline_barrier2` 中的所有 barrier
///
/// 同一个 dependency 中的 barrier 之间没有先后顺序，因此不能作用于同一个 subresource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxDependency {
    pub buffer_barriers: Vec<GfxBufferBarrier>,
    pub image_barriers: Vec<GfxImageBarrier>,
}

impl GfxDependency {
    pub fn buffers(barriers: &[GfxBufferBarrier]) -> Self {
        Self {
            buffer_barriers: barriers.to_vec(),
            image_barriers: Vec::new(),
        }
    }

    pub fn images(barriers: &[GfxImageBarrier]) -> Self {
        Self {
            buffer_barriers: Vec::new(),
            image_barriers: barriers.to_vec(),
        }
    }

    /// 第一对作用于同一个 subresource 的 image barrier
    pub fn overlapping_images(&self) -> Option<(&GfxImageBarrier, &GfxImageBarrier)> {
        self.image_barriers
            .iter()
            .enumerate()
            .flat_map(|(i, a)| self.image_barriers[i + 1..].iter().map(move |b| (a, b)))
            .find(|(a, b)| a.overlaps(b))
    }

    pub fn overlapping_buffers(&self) -> Option<(&GfxBufferBarrier, &GfxBufferBarrier)> {
        self.buffer_barriers
            .iter()
            .enumerate()
            .flat_map(|(i, a)| self.buffer_barriers[i + 1..].iter().map(move |b| (a, b)))
            .find(|(a, b)| a.overlaps(b))
    }

    #[inline]
    pub fn has_overlap(&self) -> bool {
        self.overlapping_images().is_some() || self.overlapping_buffers().is_some()
    }

    pub fn to_vk(&self) -> (Vec<vk::BufferMemoryBarrier2<'static>>, Vec<vk::ImageMemoryBarrier2<'static>>) {
        (
            self.buffer_barriers.iter().map(GfxBufferBarrier::to_vk).collect(),
            self.image_barriers.iter().map(GfxImageBarrier::to_vk).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    #[test]
    fn test_same_family_is_ignored() {
        let barrier = GfxBufferBarrier::new().queue_family_transfer(2, 2);
        assert!(!barrier.queue_family.is_transfer());
        assert_eq!(barrier.to_vk().src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.to_vk().dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_image_barrier_to_vk() {
        let barrier = GfxImageBarrier::new()
            .queue_family_transfer(1, 0)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .mip_range(2, 3);

        let vk_barrier = barrier.to_vk();
        assert_eq!(vk_barrier.src_queue_family_index, 1);
        assert_eq!(vk_barrier.dst_queue_family_index, 0);
        assert_eq!(vk_barrier.subresource_range.base_mip_level, 2);
        assert_eq!(vk_barrier.subresource_range.level_count, 3);
        assert_eq!(vk_barrier.dst_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_image_overlap() {
        let image = vk::Image::from_raw(7);
        let level = |base, count| {
            GfxImageBarrier::new().image(image).image_aspect_flag(vk::ImageAspectFlags::COLOR).mip_range(base, count)
        };

        assert!(level(0, 3).overlaps(&level(2, 1)));
        assert!(!level(0, 2).overlaps(&level(2, 1)));
        assert!(!level(0, 3).overlaps(&level(0, 3).image(vk::Image::from_raw(8))));

        let disjoint = GfxDependency::images(&[level(0, 2), level(2, 1)]);
        assert!(!disjoint.has_overlap());
        let overlapping = GfxDependency::images(&[level(0, 3), level(0, 1)]);
        assert_eq!(overlapping.overlapping_images(), Some((&level(0, 3), &level(0, 1))));
    }

    #[test]
    fn test_buffer_overlap() {
        let buffer = vk::Buffer::from_raw(3);
        let range = |offset, size| GfxBufferBarrier::new().buffer(buffer, offset, size);

        assert!(range(0, vk::WHOLE_SIZE).overlaps(&range(1024, 16)));
        assert!(!range(0, 16).overlaps(&range(16, 16)));
        assert!(!GfxDependency::buffers(&[range(0, 16), range(16, vk::WHOLE_SIZE)]).has_overlap());
        assert!(GfxDependency::buffers(&[range(0, 32), range(16, 16)]).has_overlap());
    }
}
