use ash::vk;

use crate::{
    commands::{command_queue::GfxQueueKind, fence::GfxFence, semaphore::GfxSemaphore, submit_info::GfxSubmitInfo},
    descriptors::write_descriptor_set::GfxWriteDescriptorSet,
    resources::{
        buffer::{GfxBuffer, GfxBufferCreateInfo},
        image::{GfxImage, GfxImageCreateInfo},
    },
};

/// 一次提交产生的临时 command buffer
///
/// GPU 执行完之前不能释放，通过 `GfxBackend::free_submission` 归还
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxSubmission {
    pub queue: GfxQueueKind,
    pub command_buffer: vk::CommandBuffer,
}

/// 资源流送对设备的全部依赖
///
/// device / instance 的创建不在这里，由外部完成后交给实现者。
/// 所有方法都可能被多个 worker 线程同时调用，实现者需要自行保证 queue 与 command pool 的外部同步。
pub trait GfxBackend: Send + Sync {
    /// transfer / graphics 对应的 queue family index
    fn queue_family_index(&self, kind: GfxQueueKind) -> u32;

    // buffer
    fn create_buffer(&self, info: &GfxBufferCreateInfo) -> anyhow::Result<GfxBuffer>;
    /// 只能写入 HostVisible 的 buffer，写入后会 flush
    fn write_buffer(&self, buffer: &GfxBuffer, data: &[u8]) -> anyhow::Result<()>;
    fn destroy_buffer(&self, buffer: GfxBuffer);

    // image
    fn create_image(&self, info: &GfxImageCreateInfo) -> anyhow::Result<GfxImage>;
    fn destroy_image(&self, image: GfxImage);

    // sync
    fn create_semaphore(&self, debug_name: &str) -> anyhow::Result<GfxSemaphore>;
    fn destroy_semaphore(&self, semaphore: GfxSemaphore);
    /// 创建时处于 unsignaled 状态
    fn create_fence(&self, debug_name: &str) -> anyhow::Result<GfxFence>;
    fn reset_fence(&self, fence: &GfxFence) -> anyhow::Result<()>;
    fn destroy_fence(&self, fence: GfxFence);
    /// 非阻塞查询 fence 是否已经 signal
    fn fence_signaled(&self, fence: &GfxFence) -> anyhow::Result<bool>;

    /// 将命令录制到一个临时 command buffer 中并提交到对应的 queue
    fn submit(&self, queue: GfxQueueKind, submit_info: GfxSubmitInfo) -> anyhow::Result<GfxSubmission>;
    fn free_submission(&self, submission: GfxSubmission);

    /// descriptor 写入原语
    fn write_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]);
}
