//! Strata 的 GFX 层
//!
//! 资源流送只通过 [`backend::GfxBackend`] 使用设备：
//! - 命令以数据的形式录制在 [`commands::command_list::GfxCommandList`] 中，提交时才翻译为 Vulkan 命令
//! - buffer / image 只暴露句柄与描述信息，内存由 backend 管理
//! - [`vulkan::GfxVulkanBackend`] 是基于 ash + vk-mem 的实现，device 与 queue 由外部创建

pub mod backend;
pub mod commands;
pub mod descriptors;
pub mod resources;
pub mod vulkan;
