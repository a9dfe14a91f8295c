//! 跨 queue 的资源上传
//!
//! 每种资源的上传都遵循同一个流程：
//! 1. 后台任务写入 HostVisible 的 staging buffer，创建 DeviceLocal 的目标资源
//! 2. transfer queue：复制 staging -> 目标，随后 **release** barrier，提交时 signal semaphore
//! 3. graphics queue：等待 semaphore，**acquire** barrier（需要时生成 mip），提交时 signal fence
//! 4. completion stub 非阻塞地查询 fence，signal 之后在 `tick` 中释放 staging 与同步对象并 finalize
//!
//! 提交之前出错：释放已经分配的资源，slot 标记为 Failed。
//! 提交之后出错：GPU 可能仍在访问这些资源，只记录错误并标记 Failed，资源不再回收。

pub mod buffer;
pub mod file_view;
pub mod mesh;
pub mod model;
pub mod texture;

use std::fmt;
use std::sync::Arc;

use ash::vk;
use strata_gfx::backend::GfxSubmission;
use strata_gfx::commands::{
    command_list::GfxCommandList, command_queue::GfxQueueKind, fence::GfxFence, semaphore::GfxSemaphore,
    submit_info::GfxSubmitInfo,
};
use strata_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};

use crate::completion::{CompletionStatus, CompletionStub};
use crate::context::StreamContext;

/// 单个资源的上传阶段，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// 数据已经写入 staging buffer
    Staged,
    /// 复制与 release 已经提交到 transfer queue
    Copied,
    /// acquire 已经提交到 graphics queue
    OwnershipTransferring,
    /// acquire 之后在 graphics queue 上生成 mip 链
    MipGeneration,
    /// fence signal，slot 已 finalize
    Ready,
}

#[inline]
pub(crate) fn log_state(name: &str, state: UploadState) {
    log::debug!("[upload] {}: {:?}", name, state);
}

/// 上传失败的阶段
pub(crate) enum UploadError {
    /// 尚未提交任何 GPU 工作，资源可以安全释放
    BeforeSubmit(anyhow::Error),
    /// transfer 已经提交，GPU 可能仍在访问资源
    AfterSubmit(anyhow::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::BeforeSubmit(e) => write!(f, "{:#}", e),
            UploadError::AfterSubmit(e) => write!(f, "{:#} (after submission, resources leaked)", e),
        }
    }
}

/// 创建 staging buffer 并写入数据
pub(crate) fn create_staging(ctx: &StreamContext, name: &str, data: &[u8]) -> anyhow::Result<GfxBuffer> {
    let backend = ctx.backend();
    let staging = backend.create_buffer(&GfxBufferCreateInfo::new_stage_buffer(data.len() as vk::DeviceSize, name))?;
    if let Err(e) = backend.write_buffer(&staging, data) {
        backend.destroy_buffer(staging);
        return Err(e);
    }
    Ok(staging)
}

/// 一次上传需要提交的全部内容
pub(crate) struct UploadBatch {
    pub name: String,
    pub staging: Vec<GfxBuffer>,
    /// 复制 + release
    pub transfer: GfxCommandList,
    /// acquire (+ mip)
    pub graphics: GfxCommandList,
    /// graphics 提交在哪个 stage 等待 transfer 的 semaphore
    pub wait_stage: vk::PipelineStageFlags2,
    pub generates_mips: bool,
}

/// 已经提交、等待 fence 的上传
pub(crate) struct InFlightUpload {
    name: String,
    staging: Vec<GfxBuffer>,
    submissions: Vec<GfxSubmission>,
    semaphore: GfxSemaphore,
    fence: GfxFence,
}

impl InFlightUpload {
    /// GPU 完成之后释放 staging、command buffer，并归还同步对象
    fn release(self, ctx: &StreamContext) {
        for staging in self.staging {
            ctx.backend().destroy_buffer(staging);
        }
        for submission in self.submissions {
            ctx.backend().free_submission(submission);
        }
        ctx.sync_pool().release_semaphore(self.semaphore);
        ctx.sync_pool().release_fence(self.fence);
    }
}

/// 依次提交 transfer 与 graphics 两段命令
///
/// 返回 `BeforeSubmit` 时 staging 已经释放；目标资源总是由调用者负责
pub(crate) fn submit_upload(ctx: &StreamContext, batch: UploadBatch) -> Result<InFlightUpload, UploadError> {
    let _span = tracy_client::span!("submit_upload");
    let UploadBatch {
        name,
        staging,
        transfer,
        graphics,
        wait_stage,
        generates_mips,
    } = batch;
    let backend = ctx.backend();
    let sync_pool = ctx.sync_pool();

    let destroy_staging = |staging: Vec<GfxBuffer>| staging.into_iter().for_each(|b| backend.destroy_buffer(b));

    let semaphore = match sync_pool.acquire_semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            destroy_staging(staging);
            return Err(UploadError::BeforeSubmit(e));
        }
    };
    let fence = match sync_pool.acquire_fence() {
        Ok(fence) => fence,
        Err(e) => {
            sync_pool.release_semaphore(semaphore);
            destroy_staging(staging);
            return Err(UploadError::BeforeSubmit(e));
        }
    };

    let transfer_submission = match backend.submit(GfxQueueKind::Transfer, GfxSubmitInfo::new(transfer).signal(&semaphore))
    {
        Ok(submission) => submission,
        Err(e) => {
            sync_pool.release_semaphore(semaphore);
            sync_pool.release_fence(fence);
            destroy_staging(staging);
            return Err(UploadError::BeforeSubmit(e));
        }
    };
    log_state(&name, UploadState::Copied);

    let graphics_submission = backend
        .submit(GfxQueueKind::Graphics, GfxSubmitInfo::new(graphics).wait(&semaphore, wait_stage).fence(&fence))
        .map_err(UploadError::AfterSubmit)?;
    log_state(&name, UploadState::OwnershipTransferring);
    if generates_mips {
        log_state(&name, UploadState::MipGeneration);
    }

    Ok(InFlightUpload {
        name,
        staging,
        submissions: vec![transfer_submission, graphics_submission],
        semaphore,
        fence,
    })
}

/// 登记一个 fence stub：signal 之后释放上传的临时资源，再执行 `finalize`
pub(crate) fn register_upload(
    ctx: &Arc<StreamContext>,
    upload: InFlightUpload,
    finalize: impl FnOnce(&StreamContext) + Send + 'static,
) {
    let fence = upload.fence;
    let poll_ctx = ctx.clone();
    let cleanup_ctx = ctx.clone();
    let stub_name = upload.name.clone();

    ctx.completions().insert(CompletionStub::new(
        stub_name,
        move || match poll_ctx.backend().fence_signaled(&fence) {
            Ok(true) => CompletionStatus::Done,
            Ok(false) => CompletionStatus::Pending,
            Err(e) => {
                // 设备丢失之类的错误，继续等待没有意义
                log::error!("query fence failed: {:#}", e);
                CompletionStatus::Done
            }
        },
        move || {
            let name = upload.name.clone();
            upload.release(&cleanup_ctx);
            finalize(&cleanup_ctx);
            log_state(&name, UploadState::Ready);
        },
    ));
}

/// 两个 queue family 之间的 release / acquire 所用的 family index
#[derive(Debug, Clone, Copy)]
pub(crate) struct OwnershipTransfer {
    pub src: u32,
    pub dst: u32,
}

impl OwnershipTransfer {
    pub fn from_ctx(ctx: &StreamContext) -> Self {
        let (transfer, graphics) = ctx.queue_families();
        Self {
            src: transfer,
            dst: graphics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_context;

    #[test]
    fn test_failed_transfer_submit_releases_staging() {
        let (backend, ctx) = test_context(true);
        let staging = create_staging(&ctx, "broken", &[1, 2, 3, 4]).unwrap();
        let mut transfer = GfxCommandList::new("broken");
        // 复制目标不存在，fake backend 拒绝这次提交
        transfer.cmd_copy_buffer(staging.vk_buffer(), vk::Buffer::null(), 4);

        let result = submit_upload(
            &ctx,
            UploadBatch {
                name: "broken".to_string(),
                staging: vec![staging],
                transfer,
                graphics: GfxCommandList::new("broken"),
                wait_stage: vk::PipelineStageFlags2::TRANSFER,
                generates_mips: false,
            },
        );

        assert!(matches!(result, Err(UploadError::BeforeSubmit(_))));
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(ctx.sync_pool().available(), (ctx.config().sync_pool_capacity, ctx.config().sync_pool_capacity));
        ctx.shutdown();
    }
}
