use ash::vk;

use crate::commands::{command_list::GfxCommandList, fence::GfxFence, semaphore::GfxSemaphore};

/// 等待的 semaphore 以及在哪个 stage 等待
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreWait {
    pub semaphore: GfxSemaphore,
    pub stage: vk::PipelineStageFlags2,
}

/// 一次队列提交的完整描述
///
/// 一段命令，可选的 wait semaphore，可选的 signal semaphore，可选的 fence
#[derive(Clone, Debug)]
pub struct GfxSubmitInfo {
    pub commands: GfxCommandList,
    pub wait: Option<GfxSemaphoreWait>,
    pub signal: Option<GfxSemaphore>,
    pub fence: Option<GfxFence>,
}

impl GfxSubmitInfo {
    pub fn new(commands: GfxCommandList) -> Self {
        Self {
            commands,
            wait: None,
            signal: None,
            fence: None,
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.wait = Some(GfxSemaphoreWait {
            semaphore: *semaphore,
            stage,
        });
        self
    }

    /// semaphore 在所有命令执行完之后 signal
    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore) -> Self {
        self.signal = Some(*semaphore);
        self
    }

    #[inline]
    pub fn fence(mut self, fence: &GfxFence) -> Self {
        self.fence = Some(*fence);
        self
    }
}
