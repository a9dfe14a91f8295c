use ash::vk;

/// GPU -> CPU 的信号，只通过非阻塞的方式查询
///
/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要通过 backend 手动 destroy
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxFence {
    fence: vk::Fence,
}

// new & init
impl GfxFence {
    #[inline]
    pub fn from_handle(fence: vk::Fence) -> Self {
        Self { fence }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}
