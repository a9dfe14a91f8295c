use ash::vk;

/// 内存驻留位置
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxMemoryResidency {
    /// CPU 可以直接写入，用作 staging buffer
    HostVisible,
    /// 只有 GPU 可以访问，需要通过 transfer 写入
    DeviceLocal,
}

#[derive(Clone, Debug)]
pub struct GfxBufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub residency: GfxMemoryResidency,
    pub debug_name: String,
}

impl GfxBufferCreateInfo {
    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, debug_name: impl AsRef<str>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            residency: GfxMemoryResidency::HostVisible,
            debug_name: format!("{}-stage", debug_name.as_ref()),
        }
    }

    /// 作为 transfer 的目标，额外添加 TRANSFER_DST
    #[inline]
    pub fn new_device_buffer(
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        debug_name: impl AsRef<str>,
    ) -> Self {
        Self {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            residency: GfxMemoryResidency::DeviceLocal,
            debug_name: debug_name.as_ref().to_string(),
        }
    }
}

/// backend 分配的 buffer
///
/// # Destroy
/// 内存由 backend 管理，需要通过 `GfxBackend::destroy_buffer` 手动释放
#[derive(Debug)]
pub struct GfxBuffer {
    handle: vk::Buffer,
    size: vk::DeviceSize,
    residency: GfxMemoryResidency,
}

// new & init
impl GfxBuffer {
    #[inline]
    pub fn new(handle: vk::Buffer, info: &GfxBufferCreateInfo) -> Self {
        Self {
            handle,
            size: info.size,
            residency: info.residency,
        }
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn residency(&self) -> GfxMemoryResidency {
        self.residency
    }
}
