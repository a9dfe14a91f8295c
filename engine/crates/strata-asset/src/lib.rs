//! Strata 异步资源流送
//!
//! 整体流程：
//! 1. `request` 立即在 [`registry::AssetRegistry`] 中预留一个 slot 并返回 [`registry::Handle`]
//! 2. 后台任务 ([`task_scheduler::TaskScheduler`]) 写入 staging buffer，在 transfer queue 上复制并 release，
//!    在 graphics queue 上 acquire（以及生成 mip）
//! 3. 完成情况以 stub 的形式登记在 [`completion::CompletionRegistry`]，由帧循环每帧调用一次
//!    [`context::StreamContext::tick`]，fence signal 之后才 finalize slot
//! 4. 渲染线程通过组合锁读取 slot，未就绪时使用 fallback，并借助 [`descriptor_cache::DescriptorBindingCache`]
//!    避免重复的 descriptor 写入

pub mod blocking;
pub mod completion;
pub mod config;
pub mod context;
pub mod descriptor_cache;
pub mod registry;
pub mod sync_pool;
pub mod task_scheduler;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_utils;
