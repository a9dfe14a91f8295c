//! 阻塞加载
//!
//! 与异步路径完全相同，只是调用方在原地循环 `tick` 直到 slot 结束。
//! 只能在创建 `StreamContext` 的线程 (帧循环所在的线程) 调用，其它线程调用会在 debug 构建中 panic。

use std::path::Path;
use std::sync::Arc;

use anyhow::bail;

use crate::context::StreamContext;
use crate::registry::{Asset, Handle, SlotStatus};
use crate::upload::mesh::{MeshData, StaticMesh};
use crate::upload::model::StaticModel;
use crate::upload::texture::{StaticTexture, TextureColorSpace};

/// 循环 tick 直到 slot ready 或 failed
///
/// 每次循环都会执行 [`StreamContext::tick`]，因此与它有相同的线程限制
pub fn wait_settled<T: Asset>(ctx: &StreamContext, handle: Handle<T>) -> anyhow::Result<()> {
    let _span = tracy_client::span!("blocking::wait_settled");
    debug_assert!(rayon::current_thread_index().is_none(), "blocking load on a worker thread");

    loop {
        ctx.tick();
        match ctx.registry().status(handle) {
            SlotStatus::Ready => return Ok(()),
            SlotStatus::Failed => bail!("{:?} failed to load", handle),
            SlotStatus::Reserved => std::thread::sleep(ctx.config().blocking_poll_interval()),
        }
    }
}

/// 阻塞直到贴图就绪，只能在创建 `StreamContext` 的线程调用
pub fn load_texture(
    ctx: &Arc<StreamContext>,
    path: impl AsRef<Path>,
    color_space: TextureColorSpace,
) -> anyhow::Result<Handle<StaticTexture>> {
    let handle = StaticTexture::request_file(ctx, path, color_space);
    wait_settled(ctx, handle)?;
    Ok(handle)
}

/// 阻塞直到 mesh 就绪，只能在创建 `StreamContext` 的线程调用
pub fn load_mesh(ctx: &Arc<StreamContext>, data: MeshData) -> anyhow::Result<Handle<StaticMesh>> {
    let handle = StaticMesh::request(ctx, data);
    wait_settled(ctx, handle)?;
    Ok(handle)
}

/// 按照配置中的 join 策略等待模型，只能在创建 `StreamContext` 的线程调用
pub fn load_model(ctx: &Arc<StreamContext>, path: impl AsRef<Path>) -> anyhow::Result<Handle<StaticModel>> {
    let handle = StaticModel::request(ctx, path);
    wait_settled(ctx, handle)?;
    Ok(handle)
}
