use std::sync::Mutex;

use anyhow::Context;
use ash::vk;

use crate::commands::{command_list::GfxCommandList, command_queue::GfxQueueFamily};
use crate::vulkan::recorder::GfxCommandRecorder;

/// 一个硬件 queue 以及在其 queue family 上创建的 command pool
///
/// queue 与 command pool 都需要外部同步，各自使用一把锁
pub(super) struct GfxQueue {
    vk_queue: Mutex<vk::Queue>,
    queue_family: GfxQueueFamily,

    /// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
    command_pool: Mutex<vk::CommandPool>,
}

// new & init
impl GfxQueue {
    pub(super) fn new(device: &ash::Device, vk_queue: vk::Queue, queue_family: GfxQueueFamily) -> anyhow::Result<Self> {
        let pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family.queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT),
                None,
            )
        }
        .with_context(|| format!("创建 {} 的 command pool 失败", queue_family.name))?;

        Ok(Self {
            vk_queue: Mutex::new(vk_queue),
            queue_family,
            command_pool: Mutex::new(pool),
        })
    }

    pub(super) fn destroy(&self, device: &ash::Device) {
        let pool = self.command_pool.lock().unwrap();
        unsafe {
            device.destroy_command_pool(*pool, None);
        }
    }
}

// getters
impl GfxQueue {
    #[inline]
    pub(super) fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }
}

// tools
impl GfxQueue {
    /// 分配一个 one-time-submit 的 command buffer 并录制命令
    ///
    /// 录制期间一直持有 command pool 的锁
    pub(super) fn record(&self, device: &ash::Device, commands: &GfxCommandList) -> anyhow::Result<vk::CommandBuffer> {
        let pool = self.command_pool.lock().unwrap();
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&info) }
            .with_context(|| format!("分配 command buffer 失败: {}", commands.label()))?[0];

        let recorded = unsafe {
            device
                .begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .and_then(|_| {
                    GfxCommandRecorder::new(device, command_buffer).record(commands);
                    device.end_command_buffer(command_buffer)
                })
        };

        if let Err(e) = recorded {
            unsafe {
                device.free_command_buffers(*pool, std::slice::from_ref(&command_buffer));
            }
            return Err(e).with_context(|| format!("录制 command buffer 失败: {}", commands.label()));
        }
        Ok(command_buffer)
    }

    pub(super) fn submit(
        &self,
        device: &ash::Device,
        submit_info: vk::SubmitInfo2<'_>,
        fence: vk::Fence,
    ) -> anyhow::Result<()> {
        let queue = self.vk_queue.lock().unwrap();
        unsafe { device.queue_submit2(*queue, std::slice::from_ref(&submit_info), fence) }
            .with_context(|| format!("提交到 {} 失败", self.queue_family.name))
    }

    /// 释放 command buffer
    ///
    /// 释放之后，command buffer 不能再被使用
    pub(super) fn free_command_buffer(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        let pool = self.command_pool.lock().unwrap();
        unsafe {
            device.free_command_buffers(*pool, std::slice::from_ref(&command_buffer));
        }
    }
}
