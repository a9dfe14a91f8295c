use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use anyhow::Context;
use strata_gfx::backend::GfxBackend;
use strata_gfx::commands::command_queue::GfxQueueKind;

use crate::blocking;
use crate::completion::CompletionRegistry;
use crate::config::StreamConfig;
use crate::registry::{AssetRegistry, Handle};
use crate::sync_pool::SyncPool;
use crate::task_scheduler::TaskScheduler;
use crate::upload::texture::{StaticTexture, TextureColorSpace, TextureData, TextureSource};

/// 资源流送的上下文
///
/// 把调度器、完成登记表、资源表、同步对象池以及 backend 组合在一起，以 `Arc` 的形式在
/// 请求方、后台任务以及 completion stub 之间共享。
///
/// # 帧循环
/// - 每帧调用一次 [`tick`](Self::tick)，finalize 已经完成 GPU 工作的资源
/// - 退出前调用 [`shutdown`](Self::shutdown)，等待所有上传完成并释放全部 GPU 资源
pub struct StreamContext {
    backend: Arc<dyn GfxBackend>,
    config: StreamConfig,

    registry: AssetRegistry,
    completions: CompletionRegistry,
    scheduler: TaskScheduler,
    sync_pool: SyncPool,

    /// 路径到句柄的映射，用于去重 (避免重复加载同一文件)
    texture_cache: Mutex<HashMap<(PathBuf, TextureColorSpace), Handle<StaticTexture>>>,

    /// 1x1 粉色纹理，用于 Reserved/Failed 状态时的占位
    fallback_texture: Handle<StaticTexture>,

    /// 创建上下文的线程，之后的 tick 与阻塞加载都必须在这个线程上
    frame_thread: ThreadId,

    shut_down: AtomicBool,
}

// new & init
impl StreamContext {
    /// 创建上下文，并以阻塞的方式上传 fallback texture
    pub fn new(backend: Arc<dyn GfxBackend>, config: StreamConfig) -> anyhow::Result<Arc<Self>> {
        let _span = tracy_client::span!("StreamContext::new");

        let scheduler = TaskScheduler::new(config.worker_threads()).context("创建后台线程池失败")?;
        let sync_pool = SyncPool::new(backend.clone(), config.sync_pool_capacity).context("创建同步对象池失败")?;
        let registry = AssetRegistry::new();
        let fallback_texture = registry.emplace_empty::<StaticTexture>();

        let ctx = Arc::new(Self {
            backend,
            config,
            registry,
            completions: CompletionRegistry::new(),
            scheduler,
            sync_pool,
            texture_cache: Mutex::new(HashMap::new()),
            fallback_texture,
            frame_thread: std::thread::current().id(),
            shut_down: AtomicBool::new(false),
        });

        let fallback = TextureSource::Pixels(TextureData::new("fallback", 1, 1, vec![255, 0, 255, 255]));
        StaticTexture::upload_into(&ctx, fallback_texture, fallback, TextureColorSpace::Linear);
        if let Err(e) = blocking::wait_settled(&ctx, fallback_texture) {
            ctx.shutdown();
            return Err(e.context("创建 fallback texture 失败"));
        }

        log::info!("StreamContext created");
        Ok(ctx)
    }
}

// getters
impl StreamContext {
    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    #[inline]
    pub fn completions(&self) -> &CompletionRegistry {
        &self.completions
    }

    #[inline]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn sync_pool(&self) -> &SyncPool {
        &self.sync_pool
    }

    /// 构造完成之后一定是 ready 的
    #[inline]
    pub fn fallback_texture(&self) -> Handle<StaticTexture> {
        self.fallback_texture
    }

    #[inline]
    pub(crate) fn texture_cache(&self) -> &Mutex<HashMap<(PathBuf, TextureColorSpace), Handle<StaticTexture>>> {
        &self.texture_cache
    }

    /// (transfer, graphics) 的 queue family index
    #[inline]
    pub fn queue_families(&self) -> (u32, u32) {
        (
            self.backend.queue_family_index(GfxQueueKind::Transfer),
            self.backend.queue_family_index(GfxQueueKind::Graphics),
        )
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

// tools
impl StreamContext {
    /// 每帧调用一次，只能由创建上下文的线程调用；不会阻塞
    ///
    /// 返回本帧 finalize 的数量
    pub fn tick(&self) -> usize {
        let _span = tracy_client::span!("StreamContext::tick");
        self.assert_frame_thread();
        self.completions.tick()
    }

    /// completion stub 的 cleanup 只在一个线程上执行
    #[inline]
    fn assert_frame_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.frame_thread,
            "StreamContext is driven from a thread other than the one that created it"
        );
    }

    /// 在后台执行一个持有上下文的任务
    pub(crate) fn spawn(self: &Arc<Self>, job: impl FnOnce(&Arc<StreamContext>) + Send + 'static) {
        let ctx = self.clone();
        self.scheduler.submit(move || job(&ctx));
    }

    /// 等待所有任务与上传完成，然后释放所有 GPU 资源
    ///
    /// 会阻塞直到所有 fence signal，只能在帧循环所在的线程调用
    pub fn shutdown(&self) {
        let _span = tracy_client::span!("StreamContext::shutdown");
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.assert_frame_thread();

        self.scheduler.wait_idle();
        while !self.completions.is_empty() {
            if self.completions.tick() == 0 {
                std::thread::sleep(self.config.blocking_poll_interval());
            }
        }

        let freed = self.registry.free_all(self.backend.as_ref());
        self.texture_cache.lock().unwrap().clear();
        self.sync_pool.destroy();
        log::info!("StreamContext shut down, {} resources released", freed);
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            log::warn!("StreamContext dropped without shutdown, GPU resources are leaked");
        }
    }
}
