use ash::vk;

#[derive(Clone, Debug)]
pub struct GfxImageCreateInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub debug_name: String,
}

impl GfxImageCreateInfo {
    /// 只有一个 mip level 的 2D image
    #[inline]
    pub fn new_image_2d_info(
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        debug_name: impl AsRef<str>,
    ) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            debug_name: debug_name.as_ref().to_string(),
        }
    }

    /// builder
    ///
    /// 多于一个 level 时需要同时作为 blit 的 src 和 dst
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        if self.mip_levels > 1 {
            self.usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }
        self
    }

    /// 完整 mip 链的 level 数量：`floor(log2(max(w, h))) + 1`
    #[inline]
    pub fn full_mip_levels(extent: vk::Extent2D) -> u32 {
        let max_dim = extent.width.max(extent.height).max(1);
        u32::BITS - max_dim.leading_zeros()
    }
}

/// backend 分配的 2D image 以及覆盖所有 mip level 的 view
///
/// # Destroy
/// 需要通过 `GfxBackend::destroy_image` 手动释放
#[derive(Debug)]
pub struct GfxImage {
    handle: vk::Image,
    view: vk::ImageView,

    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
}

// new & init
impl GfxImage {
    #[inline]
    pub fn new(handle: vk::Image, view: vk::ImageView, info: &GfxImageCreateInfo) -> Self {
        Self {
            handle,
            view,
            extent: info.extent,
            format: info.format,
            mip_levels: info.mip_levels,
        }
    }
}

// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// 只考虑 color image
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        vk::ImageAspectFlags::COLOR
    }
}
