use ash::vk;

/// binary semaphore，用于 transfer queue -> graphics queue 的 GPU 侧同步
///
/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要通过 backend 手动 destroy
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

// new & init
impl GfxSemaphore {
    #[inline]
    pub fn from_handle(semaphore: vk::Semaphore) -> Self {
        Self { semaphore }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}
