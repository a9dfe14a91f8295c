use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, bail};
use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    backend::{GfxBackend, GfxSubmission},
    commands::{
        command_queue::{GfxQueueFamily, GfxQueueKind},
        fence::GfxFence,
        semaphore::GfxSemaphore,
        submit_info::GfxSubmitInfo,
    },
    descriptors::write_descriptor_set::GfxWriteDescriptorSet,
    resources::{
        buffer::{GfxBuffer, GfxBufferCreateInfo, GfxMemoryResidency},
        image::{GfxImage, GfxImageCreateInfo},
    },
    vulkan::queue::GfxQueue,
};

struct ImageAllocation {
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
}

/// 基于 ash + vk-mem 的 backend
///
/// instance / physical device / device 以及两个 queue 都由外部创建并传入。
/// 由于 vma 的生命周期设定，需要确保 Instance 和 Device 在 backend 销毁之前一直有效。
///
/// 每个 buffer / image 的 vma allocation 以 vk handle 为 key 保存在 backend 中，
/// 上层只持有 vk handle。
pub struct GfxVulkanBackend {
    device: ash::Device,
    allocator: vk_mem::Allocator,

    transfer_queue: GfxQueue,
    graphics_queue: GfxQueue,

    buffer_allocations: Mutex<HashMap<vk::Buffer, vk_mem::Allocation>>,
    image_allocations: Mutex<HashMap<vk::Image, ImageAllocation>>,
}

// new & init
impl GfxVulkanBackend {
    /// transfer 与 graphics 可以来自同一个 queue family，此时 barrier 不会发生所有权转移
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        transfer_queue: (vk::Queue, GfxQueueFamily),
        graphics_queue: (vk::Queue, GfxQueueFamily),
    ) -> anyhow::Result<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }.context("创建 vma allocator 失败")?;

        let transfer_queue = GfxQueue::new(device, transfer_queue.0, transfer_queue.1)?;
        let graphics_queue = match GfxQueue::new(device, graphics_queue.0, graphics_queue.1) {
            Ok(queue) => queue,
            Err(e) => {
                transfer_queue.destroy(device);
                return Err(e);
            }
        };

        log::info!(
            "GfxVulkanBackend created. transfer family: {}, graphics family: {}",
            transfer_queue.queue_family().queue_family_index,
            graphics_queue.queue_family().queue_family_index
        );

        Ok(Self {
            device: device.clone(),
            allocator,
            transfer_queue,
            graphics_queue,
            buffer_allocations: Mutex::new(HashMap::new()),
            image_allocations: Mutex::new(HashMap::new()),
        })
    }
}

// getters
impl GfxVulkanBackend {
    #[inline]
    fn queue(&self, kind: GfxQueueKind) -> &GfxQueue {
        match kind {
            GfxQueueKind::Transfer => &self.transfer_queue,
            GfxQueueKind::Graphics => &self.graphics_queue,
        }
    }
}

impl GfxBackend for GfxVulkanBackend {
    fn queue_family_index(&self, kind: GfxQueueKind) -> u32 {
        self.queue(kind).queue_family().queue_family_index
    }

    fn create_buffer(&self, info: &GfxBufferCreateInfo) -> anyhow::Result<GfxBuffer> {
        let _span = tracy_client::span!("GfxVulkanBackend::create_buffer");
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(info.size)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = match info.residency {
            GfxMemoryResidency::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            GfxMemoryResidency::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .with_context(|| format!("创建 buffer 失败: {}, size: {}", info.debug_name, info.size))?;
        self.buffer_allocations.lock().unwrap().insert(buffer, allocation);

        log::debug!("create buffer: {}, size: {}, {:?}", info.debug_name, info.size, info.residency);
        Ok(GfxBuffer::new(buffer, info))
    }

    fn write_buffer(&self, buffer: &GfxBuffer, data: &[u8]) -> anyhow::Result<()> {
        let _span = tracy_client::span!("GfxVulkanBackend::write_buffer");
        if buffer.residency() != GfxMemoryResidency::HostVisible {
            bail!("只能写入 HostVisible 的 buffer: {:?}", buffer.vk_buffer());
        }
        if data.len() as vk::DeviceSize > buffer.size() {
            bail!("写入的数据超过 buffer 大小: {} > {}", data.len(), buffer.size());
        }

        let mut allocations = self.buffer_allocations.lock().unwrap();
        let allocation = allocations
            .get_mut(&buffer.vk_buffer())
            .with_context(|| format!("buffer 不属于当前 backend: {:?}", buffer.vk_buffer()))?;
        unsafe {
            let ptr = self.allocator.map_memory(allocation).context("map buffer 失败")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            self.allocator.unmap_memory(allocation);
            self.allocator
                .flush_allocation(allocation, 0, data.len() as vk::DeviceSize)
                .context("flush buffer 失败")?;
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        let allocation = self.buffer_allocations.lock().unwrap().remove(&buffer.vk_buffer());
        match allocation {
            Some(mut allocation) => unsafe {
                self.allocator.destroy_buffer(buffer.vk_buffer(), &mut allocation);
            },
            None => log::error!("destroy unknown buffer: {:?}", buffer.vk_buffer()),
        }
    }

    fn create_image(&self, info: &GfxImageCreateInfo) -> anyhow::Result<GfxImage> {
        let _span = tracy_client::span!("GfxVulkanBackend::create_image");
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.extent.width,
                height: info.extent.height,
                depth: 1,
            })
            .mip_levels(info.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, mut allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }
            .with_context(|| format!("创建 image 失败: {}", info.debug_name))?;

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(info.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: info.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(e).with_context(|| format!("创建 image view 失败: {}", info.debug_name));
            }
        };
        self.image_allocations.lock().unwrap().insert(image, ImageAllocation { allocation, view });

        log::debug!(
            "create image: {}, {}x{}, mip levels: {}",
            info.debug_name,
            info.extent.width,
            info.extent.height,
            info.mip_levels
        );
        Ok(GfxImage::new(image, view, info))
    }

    fn destroy_image(&self, image: GfxImage) {
        let allocation = self.image_allocations.lock().unwrap().remove(&image.handle());
        match allocation {
            Some(mut allocation) => unsafe {
                self.device.destroy_image_view(allocation.view, None);
                self.allocator.destroy_image(image.handle(), &mut allocation.allocation);
            },
            None => log::error!("destroy unknown image: {:?}", image.handle()),
        }
    }

    fn create_semaphore(&self, debug_name: &str) -> anyhow::Result<GfxSemaphore> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .with_context(|| format!("创建 semaphore 失败: {debug_name}"))?;
        Ok(GfxSemaphore::from_handle(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: GfxSemaphore) {
        unsafe {
            self.device.destroy_semaphore(semaphore.handle(), None);
        }
    }

    fn create_fence(&self, debug_name: &str) -> anyhow::Result<GfxFence> {
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .with_context(|| format!("创建 fence 失败: {debug_name}"))?;
        Ok(GfxFence::from_handle(fence))
    }

    fn reset_fence(&self, fence: &GfxFence) -> anyhow::Result<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(&fence.handle())) }.context("reset fence 失败")
    }

    fn destroy_fence(&self, fence: GfxFence) {
        unsafe {
            self.device.destroy_fence(fence.handle(), None);
        }
    }

    fn fence_signaled(&self, fence: &GfxFence) -> anyhow::Result<bool> {
        unsafe { self.device.get_fence_status(fence.handle()) }.context("查询 fence 状态失败")
    }

    fn submit(&self, kind: GfxQueueKind, submit_info: GfxSubmitInfo) -> anyhow::Result<GfxSubmission> {
        let _span = tracy_client::span!("GfxVulkanBackend::submit");
        let queue = self.queue(kind);
        let command_buffer = queue.record(&self.device, &submit_info.commands)?;

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let wait_infos = submit_info
            .wait
            .iter()
            .map(|wait| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(wait.semaphore.handle())
                    .stage_mask(wait.stage)
            })
            .collect_vec();
        let signal_infos = submit_info
            .signal
            .iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore.handle())
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect_vec();
        let vk_submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);

        let fence = submit_info.fence.map_or(vk::Fence::null(), |fence| fence.handle());
        if let Err(e) = queue.submit(&self.device, vk_submit_info, fence) {
            queue.free_command_buffer(&self.device, command_buffer);
            return Err(e);
        }

        Ok(GfxSubmission {
            queue: kind,
            command_buffer,
        })
    }

    fn free_submission(&self, submission: GfxSubmission) {
        self.queue(submission.queue).free_command_buffer(&self.device, submission.command_buffer);
    }

    fn write_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]) {
        let _span = tracy_client::span!("GfxVulkanBackend::write_descriptor_sets");
        let vk_writes = writes.iter().map(|write| write.to_vk()).collect_vec();
        unsafe {
            self.device.update_descriptor_sets(&vk_writes, &[]);
        }
    }
}

impl Drop for GfxVulkanBackend {
    fn drop(&mut self) {
        let buffers = std::mem::take(self.buffer_allocations.get_mut().unwrap_or_else(|e| e.into_inner()));
        let images = std::mem::take(self.image_allocations.get_mut().unwrap_or_else(|e| e.into_inner()));
        if !buffers.is_empty() || !images.is_empty() {
            log::warn!("GfxVulkanBackend dropped with {} buffers and {} images alive", buffers.len(), images.len());
        }
        // vma 要求销毁 allocator 之前释放所有 allocation
        for (buffer, mut allocation) in buffers {
            unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
        }
        for (image, mut allocation) in images {
            unsafe {
                self.device.destroy_image_view(allocation.view, None);
                self.allocator.destroy_image(image, &mut allocation.allocation);
            }
        }

        self.transfer_queue.destroy(&self.device);
        self.graphics_queue.destroy(&self.device);
        log::info!("GfxVulkanBackend destroyed");
    }
}
