//! 基于 ash + vk-mem 的 [`GfxBackend`](crate::backend::GfxBackend) 实现

mod backend;
mod queue;
mod recorder;

pub use backend::GfxVulkanBackend;
