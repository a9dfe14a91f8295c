//! 测试用的内存 backend 以及上下文构造工具

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, bail};
use ash::vk;
use ash::vk::Handle as _;
use strata_gfx::backend::{GfxBackend, GfxSubmission};
use strata_gfx::commands::command_list::GfxCommand;
use strata_gfx::commands::{
    command_queue::GfxQueueKind, fence::GfxFence, semaphore::GfxSemaphore, submit_info::GfxSubmitInfo,
};
use strata_gfx::descriptors::write_descriptor_set::GfxWriteDescriptorSet;
use strata_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo, GfxMemoryResidency};
use strata_gfx::resources::image::{GfxImage, GfxImageCreateInfo};

use crate::config::StreamConfig;
use crate::context::StreamContext;

pub(crate) const TRANSFER_FAMILY: u32 = 1;
pub(crate) const GRAPHICS_FAMILY: u32 = 0;

/// backend 收到的一次提交
#[derive(Clone, Debug)]
pub(crate) struct RecordedSubmission {
    pub queue: GfxQueueKind,
    pub info: GfxSubmitInfo,
}

/// 只在内存中模拟的 backend
///
/// - buffer 内容保存在内存中，`CopyBuffer` 会真正复制字节
/// - fence 默认在提交时立即 signal；关闭 auto signal 之后由测试决定何时 signal
/// - 记录所有提交以及 descriptor 写入
pub(crate) struct FakeBackend {
    next_handle: AtomicU64,
    auto_signal: AtomicBool,
    /// 为 true 时下一次 create_image 失败
    fail_next_image: AtomicBool,

    buffers: Mutex<HashMap<vk::Buffer, (GfxMemoryResidency, Vec<u8>)>>,
    images: Mutex<HashSet<vk::Image>>,
    semaphores: Mutex<HashSet<vk::Semaphore>>,
    fences: Mutex<HashMap<vk::Fence, bool>>,
    live_command_buffers: Mutex<HashSet<vk::CommandBuffer>>,

    submissions: Mutex<Vec<RecordedSubmission>>,
    descriptor_writes: Mutex<Vec<GfxWriteDescriptorSet>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            auto_signal: AtomicBool::new(true),
            fail_next_image: AtomicBool::new(false),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashSet::new()),
            semaphores: Mutex::new(HashSet::new()),
            fences: Mutex::new(HashMap::new()),
            live_command_buffers: Mutex::new(HashSet::new()),
            submissions: Mutex::new(Vec::new()),
            descriptor_writes: Mutex::new(Vec::new()),
        })
    }

    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.auto_signal.store(auto_signal, Ordering::SeqCst);
    }

    pub fn fail_next_image(&self) {
        self.fail_next_image.store(true, Ordering::SeqCst);
    }

    pub fn signal_fence(&self, fence: &GfxFence) {
        self.fences.lock().unwrap().insert(fence.handle(), true);
    }

    /// signal 所有 label 以 `prefix` 开头的 graphics 提交的 fence，返回数量
    pub fn signal_submissions(&self, prefix: &str) -> usize {
        let fences = self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.info.commands.label().starts_with(prefix))
            .filter_map(|s| s.info.fence)
            .collect::<Vec<_>>();
        let mut states = self.fences.lock().unwrap();
        let mut signaled = 0;
        for fence in fences {
            if let Some(state) = states.get_mut(&fence.handle())
                && !*state
            {
                *state = true;
                signaled += 1;
            }
        }
        signaled
    }

    pub fn signal_all(&self) -> usize {
        self.signal_submissions("")
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn descriptor_writes(&self) -> Vec<GfxWriteDescriptorSet> {
        self.descriptor_writes.lock().unwrap().clone()
    }

    pub fn buffer_bytes(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.buffers.lock().unwrap().get(&buffer).map(|(_, bytes)| bytes.clone())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn live_images(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.semaphores.lock().unwrap().len()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.lock().unwrap().len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.live_command_buffers.lock().unwrap().len()
    }

    fn execute(&self, commands: &[GfxCommand]) -> anyhow::Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        for command in commands {
            if let GfxCommand::CopyBuffer { src, dst, size } = command {
                let bytes = buffers.get(src).context("copy from a destroyed buffer")?.1[..*size as usize].to_vec();
                let dst = buffers.get_mut(dst).context("copy into a destroyed buffer")?;
                dst.1[..bytes.len()].copy_from_slice(&bytes);
            }
            if let GfxCommand::CopyBufferToImage { src, dst, .. } = command {
                if !buffers.contains_key(src) || !self.images.lock().unwrap().contains(dst) {
                    bail!("copy between destroyed resources");
                }
            }
            if let GfxCommand::Barrier(dependency) = command
                && dependency.has_overlap()
            {
                bail!("overlapping barriers in one dependency: {:?}", dependency);
            }
        }
        Ok(())
    }
}

impl GfxBackend for FakeBackend {
    fn queue_family_index(&self, kind: GfxQueueKind) -> u32 {
        match kind {
            GfxQueueKind::Transfer => TRANSFER_FAMILY,
            GfxQueueKind::Graphics => GRAPHICS_FAMILY,
        }
    }

    fn create_buffer(&self, info: &GfxBufferCreateInfo) -> anyhow::Result<GfxBuffer> {
        if info.size == 0 {
            bail!("zero sized buffer: {}", info.debug_name);
        }
        let handle = vk::Buffer::from_raw(self.next_raw());
        self.buffers.lock().unwrap().insert(handle, (info.residency, vec![0; info.size as usize]));
        Ok(GfxBuffer::new(handle, info))
    }

    fn write_buffer(&self, buffer: &GfxBuffer, data: &[u8]) -> anyhow::Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        let (residency, bytes) = buffers.get_mut(&buffer.vk_buffer()).context("unknown buffer")?;
        if *residency != GfxMemoryResidency::HostVisible {
            bail!("write into device local buffer");
        }
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        assert!(self.buffers.lock().unwrap().remove(&buffer.vk_buffer()).is_some(), "double destroy buffer");
    }

    fn create_image(&self, info: &GfxImageCreateInfo) -> anyhow::Result<GfxImage> {
        if self.fail_next_image.swap(false, Ordering::SeqCst) {
            bail!("out of device memory: {}", info.debug_name);
        }
        let image = vk::Image::from_raw(self.next_raw());
        let view = vk::ImageView::from_raw(self.next_raw());
        self.images.lock().unwrap().insert(image);
        Ok(GfxImage::new(image, view, info))
    }

    fn destroy_image(&self, image: GfxImage) {
        assert!(self.images.lock().unwrap().remove(&image.handle()), "double destroy image");
    }

    fn create_semaphore(&self, _debug_name: &str) -> anyhow::Result<GfxSemaphore> {
        let semaphore = vk::Semaphore::from_raw(self.next_raw());
        self.semaphores.lock().unwrap().insert(semaphore);
        Ok(GfxSemaphore::from_handle(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: GfxSemaphore) {
        assert!(self.semaphores.lock().unwrap().remove(&semaphore.handle()), "double destroy semaphore");
    }

    fn create_fence(&self, _debug_name: &str) -> anyhow::Result<GfxFence> {
        let fence = vk::Fence::from_raw(self.next_raw());
        self.fences.lock().unwrap().insert(fence, false);
        Ok(GfxFence::from_handle(fence))
    }

    fn reset_fence(&self, fence: &GfxFence) -> anyhow::Result<()> {
        let mut fences = self.fences.lock().unwrap();
        let state = fences.get_mut(&fence.handle()).context("unknown fence")?;
        *state = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: GfxFence) {
        assert!(self.fences.lock().unwrap().remove(&fence.handle()).is_some(), "double destroy fence");
    }

    fn fence_signaled(&self, fence: &GfxFence) -> anyhow::Result<bool> {
        self.fences.lock().unwrap().get(&fence.handle()).copied().context("unknown fence")
    }

    fn submit(&self, queue: GfxQueueKind, submit_info: GfxSubmitInfo) -> anyhow::Result<GfxSubmission> {
        if let Some(wait) = &submit_info.wait
            && !self.semaphores.lock().unwrap().contains(&wait.semaphore.handle())
        {
            bail!("wait on unknown semaphore");
        }
        self.execute(submit_info.commands.commands())?;

        let command_buffer = vk::CommandBuffer::from_raw(self.next_raw());
        self.live_command_buffers.lock().unwrap().insert(command_buffer);
        if let Some(fence) = &submit_info.fence
            && self.auto_signal.load(Ordering::SeqCst)
        {
            self.signal_fence(fence);
        }
        self.submissions.lock().unwrap().push(RecordedSubmission {
            queue,
            info: submit_info,
        });
        Ok(GfxSubmission { queue, command_buffer })
    }

    fn free_submission(&self, submission: GfxSubmission) {
        assert!(
            self.live_command_buffers.lock().unwrap().remove(&submission.command_buffer),
            "double free command buffer"
        );
    }

    fn write_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]) {
        self.descriptor_writes.lock().unwrap().extend_from_slice(writes);
    }
}

pub(crate) fn test_config() -> StreamConfig {
    StreamConfig {
        worker_threads: Some(2),
        ..Default::default()
    }
}

/// fallback texture 在构造时以阻塞方式加载，因此构造完成之后才切换 auto signal
pub(crate) fn test_context(auto_signal: bool) -> (Arc<FakeBackend>, Arc<StreamContext>) {
    test_context_with(test_config(), auto_signal)
}

pub(crate) fn test_context_with(config: StreamConfig, auto_signal: bool) -> (Arc<FakeBackend>, Arc<StreamContext>) {
    strata_crate_tools::init_log::init_log();
    let backend = FakeBackend::new();
    let ctx = StreamContext::new(backend.clone(), config).unwrap();
    backend.set_auto_signal(auto_signal);
    (backend, ctx)
}

/// 等待后台任务结束并 tick，直到条件满足
pub(crate) fn pump_until(ctx: &StreamContext, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        ctx.scheduler().wait_idle();
        ctx.tick();
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached");
}

/// 写入一个唯一的临时文件
pub(crate) fn temp_path(name: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let dir = std::env::temp_dir().join(format!(
        "strata-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}
